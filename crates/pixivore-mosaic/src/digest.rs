//! Background digest coordination.
//!
//! Each reconstruction request runs on its own worker thread and is
//! tracked by a [`DigestTicket`]. The coordinator stamps every request
//! with the colony generation at submission time and silently discards
//! results whose generation no longer matches, so a reset or image swap
//! can never publish a mosaic of the previous session.

use crate::{MosaicError, MosaicOptions, Reconstruction, TargetFrame, assemble, optimal_dimensions};
use pixivore_core::{GenerationCounter, HarvestedSample, SampleKey};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use tracing::{debug, warn};

#[derive(Debug)]
enum TicketState {
    Pending(Receiver<Reconstruction>),
    Ready(Reconstruction),
}

/// Handle for one in-flight reconstruction.
///
/// Tickets keep their own copy of the submitted samples so the
/// coordinator can fall back to inline assembly if the worker dies.
#[derive(Debug)]
pub struct DigestTicket {
    state: TicketState,
    samples: Vec<HarvestedSample>,
    generation: u64,
}

impl DigestTicket {
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state, TicketState::Ready(_))
    }
}

/// Owns the reconstruction target and serializes result acceptance.
#[derive(Debug)]
pub struct DigestCoordinator {
    target: Arc<TargetFrame>,
    options: MosaicOptions,
    generation: GenerationCounter,
    last_result: Option<Arc<Reconstruction>>,
}

impl DigestCoordinator {
    #[must_use]
    pub fn new(target: TargetFrame, options: MosaicOptions, generation: GenerationCounter) -> Self {
        Self {
            target: Arc::new(target),
            options,
            generation,
            last_result: None,
        }
    }

    #[must_use]
    pub fn target(&self) -> &TargetFrame {
        &self.target
    }

    #[must_use]
    pub fn options(&self) -> &MosaicOptions {
        &self.options
    }

    /// Submits a digest request.
    ///
    /// Input validation happens synchronously; the heavy assignment work
    /// runs on a named worker thread. If the thread cannot be spawned the
    /// result is assembled inline and the ticket comes back ready.
    pub fn create_reconstruction(
        &self,
        samples: Vec<HarvestedSample>,
    ) -> Result<DigestTicket, MosaicError> {
        if samples.is_empty() {
            return Err(MosaicError::NoSamples);
        }
        optimal_dimensions(self.target.aspect(), samples.len()).ok_or(
            MosaicError::DegenerateDimensions {
                samples: samples.len(),
            },
        )?;

        let generation = self.generation.current();
        let target = Arc::clone(&self.target);
        let options = self.options.clone();
        let worker_samples = samples.clone();
        let (tx, rx) = mpsc::channel();
        let spawn = thread::Builder::new()
            .name("pixivore-digest".into())
            .spawn(move || match assemble(&worker_samples, &target, &options, generation) {
                Ok(reconstruction) => {
                    let _ = tx.send(reconstruction);
                }
                Err(err) => warn!(%err, "digest worker failed"),
            });

        let state = match spawn {
            Ok(_handle) => TicketState::Pending(rx),
            Err(err) => {
                warn!(%err, "digest thread unavailable, assembling inline");
                TicketState::Ready(assemble(&samples, &self.target, &self.options, generation)?)
            }
        };
        Ok(DigestTicket {
            state,
            samples,
            generation,
        })
    }

    /// Waits for a ticket and applies the acceptance protocol.
    ///
    /// A fresh result becomes the new last-good result and is returned.
    /// On timeout the previous last-good result is served instead, but
    /// only while its generation is still current. If the worker
    /// disappeared the samples are re-assembled inline. A result from a
    /// superseded generation is dropped and `None` is returned.
    pub fn resolve(&mut self, ticket: DigestTicket) -> Option<Arc<Reconstruction>> {
        let DigestTicket {
            state,
            samples,
            generation,
        } = ticket;
        match state {
            TicketState::Ready(reconstruction) => self.accept_if_fresh(reconstruction),
            TicketState::Pending(rx) => match rx.recv_timeout(self.options.timeout) {
                Ok(reconstruction) => self.accept_if_fresh(reconstruction),
                Err(RecvTimeoutError::Timeout) => {
                    debug!(generation, "digest timed out, serving last result");
                    self.fresh_last_result()
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(generation, "digest worker gone, assembling inline");
                    match assemble(&samples, &self.target, &self.options, generation) {
                        Ok(reconstruction) => self.accept_if_fresh(reconstruction),
                        Err(err) => {
                            warn!(%err, "inline assembly failed");
                            None
                        }
                    }
                }
            },
        }
    }

    fn accept_if_fresh(&mut self, reconstruction: Reconstruction) -> Option<Arc<Reconstruction>> {
        let current = self.generation.current();
        if reconstruction.generation == current {
            let reconstruction = Arc::new(reconstruction);
            self.last_result = Some(Arc::clone(&reconstruction));
            Some(reconstruction)
        } else {
            debug!(
                result = reconstruction.generation,
                current, "discarding stale digest"
            );
            None
        }
    }

    /// The cached result, provided its generation is still current.
    ///
    /// Results from a superseded session are withheld here just like in
    /// [`DigestCoordinator::resolve`]: after a reset the cache reads as
    /// empty until a fresh result is accepted.
    fn fresh_last_result(&self) -> Option<Arc<Reconstruction>> {
        let current = self.generation.current();
        self.last_result
            .as_ref()
            .filter(|reconstruction| reconstruction.generation == current)
            .cloned()
    }

    #[must_use]
    pub fn last_result(&self) -> Option<Arc<Reconstruction>> {
        self.fresh_last_result()
    }

    /// Keys consumed by the most recent accepted result, raster order.
    /// Empty once a reset has superseded that result's session.
    #[must_use]
    pub fn last_used_keys(&self) -> Vec<SampleKey> {
        self.fresh_last_result()
            .map_or_else(Vec::new, |reconstruction| reconstruction.used_keys.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::time::Duration;

    fn quad_target() -> TargetFrame {
        let mut img = RgbaImage::new(2, 2);
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        img.put_pixel(1, 0, Rgba([0, 255, 0, 255]));
        img.put_pixel(0, 1, Rgba([0, 0, 255, 255]));
        img.put_pixel(1, 1, Rgba([255, 255, 0, 255]));
        TargetFrame::from_rgba(&img).expect("target")
    }

    fn quad_samples() -> Vec<HarvestedSample> {
        vec![
            HarvestedSample {
                key: (0, 0),
                rgb: [1.0, 0.0, 0.0],
            },
            HarvestedSample {
                key: (1, 0),
                rgb: [0.0, 1.0, 0.0],
            },
            HarvestedSample {
                key: (0, 1),
                rgb: [0.0, 0.0, 1.0],
            },
            HarvestedSample {
                key: (1, 1),
                rgb: [1.0, 1.0, 0.0],
            },
        ]
    }

    #[test]
    fn fresh_result_is_accepted_and_cached() {
        let counter = GenerationCounter::new();
        let mut coordinator =
            DigestCoordinator::new(quad_target(), MosaicOptions::default(), counter.clone());

        let ticket = coordinator
            .create_reconstruction(quad_samples())
            .expect("ticket");
        assert_eq!(ticket.generation(), counter.current());
        let result = coordinator.resolve(ticket).expect("fresh result");

        assert!((result.ssim - 1.0).abs() < 1e-9);
        assert_eq!(result.used_keys.len(), 4);
        assert_eq!(coordinator.last_used_keys().len(), 4);
        let cached = coordinator.last_result().expect("cached");
        assert!(Arc::ptr_eq(&cached, &result));
    }

    #[test]
    fn superseded_generation_is_discarded() {
        let counter = GenerationCounter::new();
        let mut coordinator =
            DigestCoordinator::new(quad_target(), MosaicOptions::default(), counter.clone());

        let ticket = coordinator
            .create_reconstruction(quad_samples())
            .expect("ticket");
        counter.bump();
        assert!(coordinator.resolve(ticket).is_none());
        assert!(coordinator.last_result().is_none());
        assert!(coordinator.last_used_keys().is_empty());
    }

    #[test]
    fn timeout_serves_the_last_good_result() {
        let counter = GenerationCounter::new();
        let options = MosaicOptions {
            timeout: Duration::from_millis(10),
            ..MosaicOptions::default()
        };
        let mut coordinator = DigestCoordinator::new(quad_target(), options, counter.clone());

        // Seed a last-good result without touching any worker thread.
        let seeded = assemble(
            &quad_samples(),
            coordinator.target(),
            coordinator.options(),
            counter.current(),
        )
        .expect("seed");
        let seed_ticket = DigestTicket {
            state: TicketState::Ready(seeded),
            samples: quad_samples(),
            generation: counter.current(),
        };
        assert!(seed_ticket.is_ready());
        let first = coordinator.resolve(seed_ticket).expect("seeded result");

        // A worker that never replies: sender stays alive, nothing sent.
        let (tx, rx) = mpsc::channel::<Reconstruction>();
        let stalled = DigestTicket {
            state: TicketState::Pending(rx),
            samples: quad_samples(),
            generation: counter.current(),
        };
        let served = coordinator.resolve(stalled).expect("last good result");
        assert!(Arc::ptr_eq(&served, &first));
        drop(tx);
    }

    #[test]
    fn timeout_after_reset_withholds_the_cached_result() {
        let counter = GenerationCounter::new();
        let options = MosaicOptions {
            timeout: Duration::from_millis(10),
            ..MosaicOptions::default()
        };
        let mut coordinator = DigestCoordinator::new(quad_target(), options, counter.clone());

        let ticket = coordinator
            .create_reconstruction(quad_samples())
            .expect("ticket");
        let accepted = coordinator.resolve(ticket).expect("fresh result");
        assert_eq!(accepted.used_keys.len(), 4);

        // A reset lands; the cached result now belongs to a dead session.
        counter.bump();

        let (tx, rx) = mpsc::channel::<Reconstruction>();
        let stalled = DigestTicket {
            state: TicketState::Pending(rx),
            samples: quad_samples(),
            generation: counter.current(),
        };
        assert!(
            coordinator.resolve(stalled).is_none(),
            "timeout must not resurrect a superseded result"
        );
        assert!(coordinator.last_result().is_none());
        assert!(coordinator.last_used_keys().is_empty());
        drop(tx);
    }

    #[test]
    fn dead_worker_falls_back_to_inline_assembly() {
        let counter = GenerationCounter::new();
        let mut coordinator =
            DigestCoordinator::new(quad_target(), MosaicOptions::default(), counter.clone());

        let (tx, rx) = mpsc::channel::<Reconstruction>();
        drop(tx);
        let orphaned = DigestTicket {
            state: TicketState::Pending(rx),
            samples: quad_samples(),
            generation: counter.current(),
        };
        let result = coordinator.resolve(orphaned).expect("inline result");
        assert!((result.ssim - 1.0).abs() < 1e-9);
        assert_eq!(result.rgb_distance, 0.0);
    }

    #[test]
    fn empty_submission_is_rejected_up_front() {
        let counter = GenerationCounter::new();
        let coordinator =
            DigestCoordinator::new(quad_target(), MosaicOptions::default(), counter);
        assert!(matches!(
            coordinator.create_reconstruction(Vec::new()),
            Err(MosaicError::NoSamples)
        ));
    }
}
