// cartos_core/src/engine/worker.rs

use super::queue::ObservationQueue;
use super::scheduler::PublishScheduler;
use super::{save_builder_map, MapperSettings, MapperStats};
use crate::error::PersistError;
use crate::mapping::{MapBuilder, ProcessContext, SaveOutcome};
use crate::maps::MapData;
use crate::messages::Observation;
use crate::publishing::Publisher;
use crate::types::{now_seconds, TfProvider, Timestamp};
use crossbeam_channel::{Receiver, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Requests the engine hands to its worker thread.
pub(crate) enum WorkerCommand {
    SaveMap {
        directory: PathBuf,
        reply: Sender<Result<SaveOutcome, PersistError>>,
    },
}

/// Everything the worker thread owns. The builder comes back out of `run`
/// when the thread is joined.
pub(crate) struct Worker {
    pub name: String,
    pub settings: MapperSettings,
    pub builder: Box<dyn MapBuilder>,
    pub publishers: Vec<Arc<dyn Publisher>>,
    pub queue: Arc<ObservationQueue>,
    pub stop: Arc<AtomicBool>,
    pub commands: Receiver<WorkerCommand>,
    pub tf: Arc<dyn TfProvider>,
    pub stats: Arc<MapperStats>,
}

impl Worker {
    pub fn run(mut self) -> Box<dyn MapBuilder> {
        let mut scheduler = PublishScheduler::new(self.settings.publish_period, Instant::now());
        debug!(mapper = %self.name, period = ?scheduler.period(), "worker started");

        while !self.stopping() {
            // Waiting: new data, the deadline, a command, or stop.
            let mut next = self.queue.pop_blocking(scheduler.time_until_due(Instant::now()));
            self.service_commands();

            // Draining: one item at a time, stop is honoured between items.
            while let Some(observation) = next.take() {
                if self.stopping() {
                    self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                self.process(&observation);
                drop(observation);
                self.publish_check(&mut scheduler);
                self.service_commands();
                next = self.queue.try_pop();
            }

            // Keeps the cadence under data silence.
            if !self.stopping() {
                self.publish_check(&mut scheduler);
            }
        }

        debug!(mapper = %self.name, cycles = scheduler.cycles(), "worker finished");
        self.builder
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn process(&mut self, observation: &Observation) {
        let context = ProcessContext {
            map_frame: &self.settings.map_frame,
            tf: &*self.tf,
            tf_timeout: self.settings.tf_timeout,
        };
        let builder = &mut self.builder;
        match contain(&self.name, "process", || builder.process(observation, &context)) {
            Some(Ok(())) => {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
            }
            Some(Err(error)) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                debug!(mapper = %self.name, frame = %observation.frame, %error, "skipping observation");
            }
            None => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn publish_check(&mut self, scheduler: &mut PublishScheduler) {
        let now = Instant::now();
        if !scheduler.is_due(now) {
            return;
        }
        let stamp = now_seconds();
        let name = &self.name;
        let publishers = &self.publishers;
        let builder = &mut self.builder;
        let published = contain(name, "snapshot", || match builder.snapshot() {
            Some(map) => {
                for publisher in publishers {
                    publish_one(name, &**publisher, map, stamp);
                }
                true
            }
            None => false,
        });
        if published == Some(true) {
            self.stats.published.fetch_add(1, Ordering::Relaxed);
        }
        scheduler.mark_published(now);
    }

    fn service_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                WorkerCommand::SaveMap { directory, reply } => {
                    let builder = &*self.builder;
                    // On a panic the reply sender drops and the caller sees
                    // `WorkerUnavailable`.
                    let Some(result) = contain(&self.name, "save", || save_builder_map(builder, &directory)) else {
                        continue;
                    };
                    if reply.send(result).is_err() {
                        debug!(mapper = %self.name, directory = %directory.display(), "save requester went away");
                    }
                }
            }
        }
    }
}

fn publish_one(mapper: &str, publisher: &dyn Publisher, map: &MapData, stamp: Timestamp) {
    if !publisher.supports(map) {
        debug!(mapper, publisher = publisher.name(), map_type = map.type_name(), "publisher skips this map type");
        return;
    }
    match contain(mapper, "publish", || publisher.publish(map, stamp)) {
        Some(Err(error)) => warn!(mapper, publisher = publisher.name(), %error, "publish failed"),
        Some(Ok(())) | None => {}
    }
}

/// Runs one call into builder or publisher code. A panic is logged and
/// becomes `None`, so the worker outlives faulty plugins.
fn contain<T>(mapper: &str, stage: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            error!(mapper, stage, reason = panic_message(&*payload), "recovered from a panic");
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown"
    }
}
