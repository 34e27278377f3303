//! Bounded wait for the OS to surface a freshly written partition table.

use crate::settings::SettleSettings;
use seedcard_hal::{DeviceOps, DevicePath};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Ready { waited: Duration },
    TimedOut { waited: Duration },
}

impl SettleOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, SettleOutcome::Ready { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SettleWaiter {
    timeout: Duration,
    interval: Duration,
}

impl SettleWaiter {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub fn from_settings(settings: &SettleSettings) -> Self {
        Self::new(settings.timeout(), settings.interval())
    }

    /// Polls `ready` until it returns true or the budget runs out.
    pub fn wait(&self, mut ready: impl FnMut() -> bool) -> SettleOutcome {
        let start = Instant::now();
        loop {
            if ready() {
                return SettleOutcome::Ready {
                    waited: start.elapsed(),
                };
            }
            let waited = start.elapsed();
            if waited >= self.timeout {
                return SettleOutcome::TimedOut { waited };
            }
            thread::sleep(self.interval.min(self.timeout - waited));
        }
    }

    /// Waits for partition `partition` of `device` to become visible.
    ///
    /// A timeout is only logged: the write itself already succeeded.
    pub fn wait_for_partition<H: DeviceOps + ?Sized>(
        &self,
        hal: &H,
        device: &DevicePath,
        partition: u32,
    ) -> SettleOutcome {
        let outcome = self.wait(|| match hal.partition_ready(device, partition) {
            Ok(ready) => ready,
            Err(err) => {
                log::debug!("partition {} of {} not ready: {}", partition, device, err);
                false
            }
        });
        match outcome {
            SettleOutcome::Ready { waited } => {
                log::info!("✅ Partition {} of {} ready after {:?}", partition, device, waited)
            }
            SettleOutcome::TimedOut { waited } => log::warn!(
                "partition {} of {} did not appear within {:?}; continuing",
                partition,
                device,
                waited
            ),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedcard_hal::FakeHal;

    #[test]
    fn returns_as_soon_as_ready() {
        let mut polls = 0;
        let outcome = SettleWaiter::new(Duration::from_secs(5), Duration::from_millis(1)).wait(|| {
            polls += 1;
            polls == 3
        });
        assert!(outcome.is_ready());
        assert_eq!(polls, 3);
    }

    #[test]
    fn exhausted_budget_times_out() {
        let waiter = SettleWaiter::new(Duration::from_millis(30), Duration::from_millis(10));
        match waiter.wait(|| false) {
            SettleOutcome::TimedOut { waited } => assert!(waited >= Duration::from_millis(30)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fake_partitions_that_never_appear() {
        let hal = FakeHal::new();
        hal.never_settle();
        let device = DevicePath::parse("/dev/sdz").unwrap();
        let waiter = SettleWaiter::new(Duration::from_millis(20), Duration::from_millis(5));
        assert!(!waiter.wait_for_partition(&hal, &device, 1).is_ready());

        let ready = FakeHal::new();
        assert!(waiter.wait_for_partition(&ready, &device, 1).is_ready());
    }
}
