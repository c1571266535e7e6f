//! Fixed-size worker pool that letterboxes several images in parallel.
//!
//! Workers share one job queue behind a mutex/condvar pair. `preprocess_batch`
//! blocks until every image in the batch has been handled; there is no
//! cancellation. Dropping the pool stops and joins the workers.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::RgbImage;

use crate::detect::letterbox::LetterboxParams;
use crate::detect::preprocess::{select_preprocessor, PreprocessError, Preprocessor};
use crate::frame::ImageFrame;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

type Job = Box<dyn FnOnce() + Send + 'static>;
type Slot = Option<Result<PreprocessedImage, PreprocessError>>;

/// One letterboxed image ready for inference.
#[derive(Clone, Debug, PartialEq)]
pub struct PreprocessedImage {
    /// Planar `[3, height, width]` tensor.
    pub tensor: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub letterbox: LetterboxParams,
}

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    stop: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct PreprocessingPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    preprocessor: Arc<dyn Preprocessor>,
}

impl PreprocessingPool {
    /// Start `threads` workers (at least one).
    pub fn new(threads: usize, use_simd: bool) -> Self {
        Self::with_preprocessor(threads, Arc::from(select_preprocessor(use_simd)))
    }

    pub fn with_preprocessor(threads: usize, preprocessor: Arc<dyn Preprocessor>) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
        });
        let workers = (0..threads.max(1))
            .map(|index| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("preprocess-{}", index))
                    .spawn(move || worker_loop(&shared))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    log::warn!("PreprocessingPool: failed to spawn worker: {}", e);
                    None
                }
            })
            .collect::<Vec<_>>();
        log::debug!(
            "PreprocessingPool: {} worker(s), {} preprocessor",
            workers.len(),
            preprocessor.name()
        );
        Self {
            shared,
            workers,
            preprocessor,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Letterbox every image to `width x height`. Results keep input order.
    pub fn preprocess_batch(
        &self,
        images: Vec<RgbImage>,
        width: u32,
        height: u32,
    ) -> Vec<Result<PreprocessedImage, PreprocessError>> {
        let total = images.len();
        if total == 0 {
            return Vec::new();
        }
        if self.workers.is_empty() {
            return images
                .iter()
                .map(|image| run_one(self.preprocessor.as_ref(), image, width, height))
                .collect();
        }

        let slots: Vec<Slot> = (0..total).map(|_| None).collect();
        let results = Arc::new(Mutex::new(slots));
        let done = Arc::new(AtomicUsize::new(0));

        {
            let mut queue = self.shared.lock();
            for (index, image) in images.into_iter().enumerate() {
                let preprocessor = self.preprocessor.clone();
                let results = results.clone();
                let done = done.clone();
                queue.jobs.push_back(Box::new(move || {
                    let _finished = DoneGuard(done);
                    let outcome = run_one(preprocessor.as_ref(), &image, width, height);
                    let mut slots = results.lock().unwrap_or_else(|p| p.into_inner());
                    slots[index] = Some(outcome);
                }));
            }
        }
        self.shared.available.notify_all();

        while done.load(Ordering::Acquire) < total {
            thread::sleep(POLL_INTERVAL);
        }

        let mut slots = results.lock().unwrap_or_else(|p| p.into_inner());
        slots
            .iter_mut()
            .map(|slot| slot.take().unwrap_or(Err(PreprocessError::WorkerLost)))
            .collect()
    }
}

impl Drop for PreprocessingPool {
    fn drop(&mut self) {
        self.shared.lock().stop = true;
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Counts a job as finished even if it unwinds.
struct DoneGuard(Arc<AtomicUsize>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if queue.stop {
                    return;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            log::error!("PreprocessingPool: job panicked");
        }
    }
}

fn run_one(
    preprocessor: &dyn Preprocessor,
    image: &RgbImage,
    width: u32,
    height: u32,
) -> Result<PreprocessedImage, PreprocessError> {
    let mut tensor = vec![0.0; 3 * width as usize * height as usize];
    let letterbox =
        preprocessor.preprocess(&ImageFrame::from(image), width, height, &mut tensor)?;
    Ok(PreprocessedImage {
        tensor,
        width,
        height,
        letterbox,
    })
}
