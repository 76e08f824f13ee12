use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::render::Renderer;

/// Where the render callback runs.
pub trait AudioOutput: Send {
    /// Hand `renderer` to the device. On success the device pulls audio from it
    /// until [`AudioOutput::close`].
    fn open(&mut self, renderer: Renderer, sample_rate: u32) -> Result<(), EngineError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;
}

struct DeviceWorker {
    shutdown: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// The system's default output device via cpal.
///
/// The stream lives on a dedicated thread for its whole lifetime, so opening
/// can be bounded by a timeout even when the backend blocks.
pub struct CpalOutput {
    open_timeout: Duration,
    worker: Option<DeviceWorker>,
}

impl CpalOutput {
    pub fn new(open_timeout: Duration) -> Self {
        Self {
            open_timeout,
            worker: None,
        }
    }
}

impl AudioOutput for CpalOutput {
    fn open(&mut self, renderer: Renderer, sample_rate: u32) -> Result<(), EngineError> {
        self.close();

        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("metro-audio".into())
            .spawn(move || match start_stream(renderer, sample_rate) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Blocks until close() sends or drops the sender.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(EngineError::device)?;

        match ready_rx.recv_timeout(self.open_timeout) {
            Ok(Ok(())) => {
                info!("output device open at {sample_rate} Hz");
                self.worker = Some(DeviceWorker {
                    shutdown: shutdown_tx,
                    thread,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                // The thread exits on its own once the backend returns.
                drop(shutdown_tx);
                Err(EngineError::AudioDevice(format!(
                    "timed out after {:?} opening the output device",
                    self.open_timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::AudioDevice(
                "audio thread exited before the device opened".into(),
            )),
        }
    }

    fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown.send(());
            if worker.thread.join().is_err() {
                warn!("audio thread panicked");
            }
            debug!("output device closed");
        }
    }

    fn is_open(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn start_stream(renderer: Renderer, sample_rate: u32) -> Result<cpal::Stream, EngineError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| EngineError::AudioDevice("no output device found".into()))?;

    let supported = device
        .supported_output_configs()
        .map_err(EngineError::device)?
        .filter(|c| c.min_sample_rate().0 <= sample_rate && sample_rate <= c.max_sample_rate().0)
        .max_by_key(|c| (c.channels() == 2, c.sample_format() == cpal::SampleFormat::F32))
        .ok_or_else(|| {
            EngineError::AudioDevice(format!("no output configuration supports {sample_rate} Hz"))
        })?
        .with_sample_rate(cpal::SampleRate(sample_rate));

    debug!("output config: {supported:?}");

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &supported.into(), renderer)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &supported.into(), renderer)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &supported.into(), renderer)?,
        sample_format => {
            return Err(EngineError::AudioDevice(format!(
                "unsupported sample format '{sample_format}'"
            )));
        }
    };

    stream.play().map_err(EngineError::device)?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: Renderer,
) -> Result<cpal::Stream, EngineError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let shared = renderer.shared().clone();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                renderer.render(data, channels);
            },
            move |err| {
                error!("stream error: {err}");
                shared.device_failed.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(EngineError::device)
}

struct OfflineState {
    renderer: Option<Renderer>,
    failures_left: u32,
    opens: u32,
}

/// An output driven by hand instead of by a device clock.
///
/// Used for headless rendering and for exercising the engine without audio
/// hardware. Clones share the same renderer.
#[derive(Clone)]
pub struct OfflineOutput {
    inner: Arc<Mutex<OfflineState>>,
}

impl OfflineOutput {
    pub fn new() -> Self {
        Self::failing(0)
    }

    /// An output whose first `times` opens fail.
    pub fn failing(times: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OfflineState {
                renderer: None,
                failures_left: times,
                opens: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OfflineState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pull one callback's worth of interleaved stereo from the renderer.
    ///
    /// Returns silence when nothing is open.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut data = vec![0.0f32; frames * 2];
        self.render_into(&mut data, 2);
        data
    }

    pub fn render_into<T>(&self, data: &mut [T], channels: usize)
    where
        T: SizedSample + FromSample<f32>,
    {
        match self.lock().renderer.as_mut() {
            Some(renderer) => renderer.render(data, channels),
            None => {
                for sample in data.iter_mut() {
                    *sample = T::from_sample(0.0f32);
                }
            }
        }
    }

    /// Number of successful opens so far.
    pub fn opens(&self) -> u32 {
        self.lock().opens
    }

    /// Make the next `times` opens fail.
    pub fn refuse_opens(&self, times: u32) {
        self.lock().failures_left = times;
    }

    /// Report a device failure the way a stream error callback would.
    pub fn fail(&self) {
        if let Some(renderer) = self.lock().renderer.as_ref() {
            renderer.shared().device_failed.store(true, Ordering::Release);
        }
    }
}

impl Default for OfflineOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for OfflineOutput {
    fn open(&mut self, renderer: Renderer, _sample_rate: u32) -> Result<(), EngineError> {
        let mut state = self.lock();
        if state.failures_left > 0 {
            state.failures_left -= 1;
            state.renderer = None;
            return Err(EngineError::AudioDevice("offline output refused to open".into()));
        }
        state.renderer = Some(renderer);
        state.opens += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.lock().renderer = None;
    }

    fn is_open(&self) -> bool {
        self.lock().renderer.is_some()
    }
}
