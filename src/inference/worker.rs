//! Off-thread inference.
//!
//! [`InferenceWorker`] owns the model on a dedicated thread.  The control
//! loop submits a feature vector and awaits the [`PendingInference`]
//! under a deadline, so a slow model never stalls telemetry handling.
//!
//! ```text
//!  control loop ──submit──▶ mpsc ──▶ "inference" thread ──▶ model.infer
//!       ▲                                   │
//!       └──── Signal (await with deadline) ◀┘
//! ```
//!
//! One job at a time: while an abandoned call is still running, new
//! submissions are refused with [`InferenceError::Unavailable`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::{debug, info};

use crate::app::ports::InferencePort;
use crate::decision::Prediction;
use crate::encoder::FeatureVector;
use crate::error::InferenceError;

type Answer = Result<Prediction, InferenceError>;

#[derive(Default)]
struct Reply {
    answer: Signal<CriticalSectionRawMutex, Answer>,
    done: AtomicBool,
}

struct Job {
    features: FeatureVector,
    reply: Arc<Reply>,
}

pub struct InferenceWorker {
    jobs: mpsc::Sender<Job>,
    input_len: usize,
    output_len: usize,
    in_flight: Option<Arc<Reply>>,
    limit: Duration,
}

impl InferenceWorker {
    /// Move `model` onto its own thread.  `limit` bounds the blocking
    /// [`InferencePort::infer`] path; async callers pass their own.
    pub fn spawn<M>(mut model: M, limit: Duration) -> std::io::Result<Self>
    where
        M: InferencePort + Send + 'static,
    {
        let input_len = model.input_len();
        let output_len = model.output_len();
        let (jobs, rx) = mpsc::channel::<Job>();
        std::thread::Builder::new()
            .name("inference".into())
            .spawn(move || {
                for job in rx {
                    let answer = model.infer(&job.features);
                    job.reply.done.store(true, Ordering::SeqCst);
                    job.reply.answer.signal(answer);
                }
                info!("Inference worker stopped");
            })?;
        Ok(Self {
            jobs,
            input_len,
            output_len,
            in_flight: None,
            limit,
        })
    }

    /// `true` while a previously submitted call has not returned.
    pub fn is_busy(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|r| !r.done.load(Ordering::SeqCst))
    }

    /// Queue one call on the worker thread.
    pub fn submit(&mut self, features: &FeatureVector) -> Result<PendingInference, InferenceError> {
        if self.is_busy() {
            return Err(InferenceError::Unavailable(
                "previous inference still running".into(),
            ));
        }
        let reply = Arc::new(Reply::default());
        let job = Job {
            features: *features,
            reply: reply.clone(),
        };
        self.jobs
            .send(job)
            .map_err(|_| InferenceError::Unavailable("inference thread stopped".into()))?;
        self.in_flight = Some(reply.clone());
        Ok(PendingInference { reply })
    }
}

impl InferencePort for InferenceWorker {
    fn input_len(&self) -> usize {
        self.input_len
    }

    fn output_len(&self) -> usize {
        self.output_len
    }

    fn infer(&mut self, features: &FeatureVector) -> Result<Prediction, InferenceError> {
        let pending = self.submit(features)?;
        futures_lite::future::block_on(pending.wait(self.limit))
    }
}

/// A submitted call.  Dropping it abandons the result; the worker still
/// finishes the call before taking another.
pub struct PendingInference {
    reply: Arc<Reply>,
}

impl PendingInference {
    /// Resolve with the model's answer, or [`InferenceError::Timeout`]
    /// once `limit` passes.
    pub async fn wait(self, limit: Duration) -> Result<Prediction, InferenceError> {
        let reply = self.reply;
        futures_lite::future::or(reply.answer.wait(), async {
            async_io_mini::Timer::after(limit).await;
            debug!("inference deadline of {} ms passed", limit.as_millis());
            Err(InferenceError::Timeout)
        })
        .await
    }
}
