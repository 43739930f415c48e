use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::common::LifecycleEvent;
use crate::repository::SharedRepository;
use crate::storage::KeyValueStore;

/// Snapshots the board on a timer and on host lifecycle events.
///
/// Backup is advisory: every failure is logged and the loop keeps going.
pub struct BackupScheduler<B> {
    repo: SharedRepository<B>,
    interval: Duration,
    events: mpsc::Receiver<LifecycleEvent>,
}

impl<B: KeyValueStore> BackupScheduler<B> {
    pub fn new(
        repo: SharedRepository<B>,
        interval: Duration,
        events: mpsc::Receiver<LifecycleEvent>,
    ) -> Self {
        Self {
            repo,
            // tokio intervals reject a zero period
            interval: interval.max(Duration::from_secs(1)),
            events,
        }
    }

    /// Runs until the event channel closes, then takes one last backup.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!(
            "Auto-backup started, interval {}s",
            self.interval.as_secs()
        );

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    if let Some(event) = event {
                        self.handle_event(event);
                    } else {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.backup("interval");
                }
            }
        }

        self.backup("shutdown");
        log::info!("Auto-backup stopped");
    }

    fn handle_event(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Hidden => self.backup("hidden"),
            LifecycleEvent::Unload => self.backup("unload"),
            LifecycleEvent::Focus => self.refresh(),
        }
    }

    fn backup(&self, trigger: &str) {
        let Ok(mut repo) = self.repo.lock() else {
            log::error!("Repository lock poisoned; skipping {trigger} backup");
            return;
        };
        match repo.backup() {
            Ok(()) => log::debug!("Backup ({trigger}) saved {} messages", repo.count()),
            Err(err) => log::error!("Backup ({trigger}) failed: {err}"),
        }
    }

    fn refresh(&self) {
        let Ok(mut repo) = self.repo.lock() else {
            log::error!("Repository lock poisoned; skipping refresh");
            return;
        };
        let provenance = repo.refresh();
        log::info!(
            "Refreshed {} messages from {provenance} storage",
            repo.count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FixedStamper;
    use crate::config::{SeedConfig, StorageKeys};
    use crate::repository::MessageRepository;
    use crate::storage::backend::testing::{FaultSwitch, FlakyStore};
    use crate::storage::{LayeredStore, MemoryStore, RawMessage};

    fn shared_repo() -> (SharedRepository<FlakyStore>, FaultSwitch) {
        let (flaky, switch) = FlakyStore::new(MemoryStore::new());
        let store = LayeredStore::new(flaky, StorageKeys::default(), SeedConfig::default());
        let mut repo = MessageRepository::with_stamper(store, Box::new(FixedStamper::default()));
        repo.add(RawMessage::with_content("A", "Q")).unwrap();
        (repo.into_shared(), switch)
    }

    #[tokio::test]
    async fn lifecycle_events_trigger_backups() {
        let (repo, switch) = shared_repo();
        let (tx, rx) = mpsc::channel(8);
        let scheduler = BackupScheduler::new(repo.clone(), Duration::from_secs(3600), rx);
        let handle = tokio::spawn(scheduler.run());

        let before = switch.writes();
        tx.send(LifecycleEvent::Hidden).await.unwrap();
        tx.send(LifecycleEvent::Focus).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        // hidden + shutdown, three writes per guarded save
        assert_eq!(switch.writes() - before, 6);
        assert_eq!(repo.lock().unwrap().count(), 1);
    }

    #[tokio::test]
    async fn interval_tick_backs_up() {
        tokio::time::pause();

        let (repo, switch) = shared_repo();
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(BackupScheduler::new(repo, Duration::from_secs(60), rx).run());

        let before = switch.writes();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(switch.writes() - before, 3);

        drop(tx);
        handle.await.unwrap();
        assert_eq!(switch.writes() - before, 6);
    }

    #[tokio::test]
    async fn failing_backups_do_not_stop_the_loop() {
        let (repo, switch) = shared_repo();
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(
            BackupScheduler::new(repo.clone(), Duration::from_secs(3600), rx).run(),
        );

        switch.fail_writes(true);
        tx.send(LifecycleEvent::Unload).await.unwrap();
        tx.send(LifecycleEvent::Hidden).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(repo.lock().unwrap().count(), 1);
    }
}
