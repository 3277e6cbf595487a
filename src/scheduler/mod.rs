//! Cooperative in-process scheduler
//! Named jobs with cron-lite schedules, evaluated on a short tick. A job
//! still running when its next slot arrives is skipped and logged. A
//! broadcast shutdown stops the loop; in-flight jobs finish their current
//! transaction.

use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::session::{session_phase, SessionPhase};

/// When a job fires, in local wall-clock terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSchedule {
    /// Once a day at HH:MM.
    DailyAt { hour: u32, minute: u32 },
    /// Every hour at a fixed minute offset.
    HourlyAt { minute: u32 },
    /// Monday..Friday at each listed HH:MM.
    WeekdaysAt { times: Vec<(u32, u32)> },
    /// Monday..Friday, every N minutes.
    WeekdaysEvery { minutes: u32 },
    /// On the hour, every N hours, only while the market session is open.
    MarketHoursEvery { hours: u32 },
}

impl JobSchedule {
    pub fn is_due(&self, local: DateTime<Local>, utc: DateTime<Utc>) -> bool {
        let weekday_ok = local.weekday().num_days_from_monday() < 5;
        match self {
            JobSchedule::DailyAt { hour, minute } => {
                local.hour() == *hour && local.minute() == *minute
            }
            JobSchedule::HourlyAt { minute } => local.minute() == *minute,
            JobSchedule::WeekdaysAt { times } => {
                weekday_ok
                    && times
                        .iter()
                        .any(|(h, m)| local.hour() == *h && local.minute() == *m)
            }
            JobSchedule::WeekdaysEvery { minutes } => {
                if !weekday_ok || *minutes == 0 {
                    return false;
                }
                (local.hour() * 60 + local.minute()) % minutes == 0
            }
            JobSchedule::MarketHoursEvery { hours } => {
                *hours > 0
                    && local.minute() == 0
                    && local.hour() % hours == 0
                    && session_phase(utc) == SessionPhase::Regular
            }
        }
    }
}

type BoxedTask = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct Job {
    pub name: String,
    pub schedules: Vec<JobSchedule>,
    task: BoxedTask,
}

impl Job {
    pub fn new<F, Fut>(name: &str, schedules: Vec<JobSchedule>, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            schedules,
            task: Arc::new(move || Box::pin(task())),
        }
    }
}

pub struct Scheduler {
    jobs: Vec<Job>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    pub fn add_job(&mut self, job: Job) {
        info!("Scheduled job '{}'", job.name);
        self.jobs.push(job);
    }

    /// Main loop: evaluate schedules on a 20-second tick, spawn due jobs,
    /// skip jobs whose previous run is still alive. Blocks until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(20));
        // Minute-key of the last firing per job, so one slot fires once.
        let mut last_fired: HashMap<String, String> = HashMap::new();
        let mut running: HashMap<String, JoinHandle<()>> = HashMap::new();

        info!("Scheduler started with {} jobs", self.jobs.len());

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let local = Local::now();
                    let utc = Utc::now();
                    let minute_key = local.format("%Y-%m-%d %H:%M").to_string();

                    for job in &self.jobs {
                        if !job.schedules.iter().any(|s| s.is_due(local, utc)) {
                            continue;
                        }
                        if last_fired.get(&job.name) == Some(&minute_key) {
                            continue;
                        }
                        last_fired.insert(job.name.clone(), minute_key.clone());

                        if let Some(handle) = running.get(&job.name) {
                            if !handle.is_finished() {
                                warn!("Job '{}' still running, tick skipped", job.name);
                                continue;
                            }
                        }

                        info!("Job '{}' firing", job.name);
                        let task = Arc::clone(&job.task);
                        running.insert(job.name.clone(), tokio::spawn(task()));
                    }
                }
                _ = shutdown.recv() => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }

        // Let in-flight jobs reach their next safe point.
        for (name, handle) in running {
            if !handle.is_finished() {
                info!("Waiting for job '{}' to finish", name);
                let _ = handle.await;
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_daily_at() {
        let s = JobSchedule::DailyAt { hour: 22, minute: 0 };
        assert!(s.is_due(local(2025, 1, 6, 22, 0), Utc::now()));
        assert!(!s.is_due(local(2025, 1, 6, 22, 1), Utc::now()));
        assert!(!s.is_due(local(2025, 1, 6, 21, 0), Utc::now()));
    }

    #[test]
    fn test_hourly_offset() {
        let s = JobSchedule::HourlyAt { minute: 10 };
        assert!(s.is_due(local(2025, 1, 6, 3, 10), Utc::now()));
        assert!(s.is_due(local(2025, 1, 6, 14, 10), Utc::now()));
        assert!(!s.is_due(local(2025, 1, 6, 14, 11), Utc::now()));
    }

    #[test]
    fn test_weekdays_at() {
        let s = JobSchedule::WeekdaysAt {
            times: vec![(9, 0), (13, 0), (17, 0)],
        };
        // Monday 2025-01-06
        assert!(s.is_due(local(2025, 1, 6, 9, 0), Utc::now()));
        assert!(s.is_due(local(2025, 1, 6, 13, 0), Utc::now()));
        // Saturday 2025-01-04
        assert!(!s.is_due(local(2025, 1, 4, 9, 0), Utc::now()));
    }

    #[test]
    fn test_weekdays_every_five_minutes() {
        let s = JobSchedule::WeekdaysEvery { minutes: 5 };
        assert!(s.is_due(local(2025, 1, 6, 10, 0), Utc::now()));
        assert!(s.is_due(local(2025, 1, 6, 10, 5), Utc::now()));
        assert!(!s.is_due(local(2025, 1, 6, 10, 3), Utc::now()));
        assert!(!s.is_due(local(2025, 1, 4, 10, 5), Utc::now()));
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let (tx, rx) = broadcast::channel(1);
        let scheduler = Scheduler::new();
        let handle = tokio::spawn(scheduler.run(rx));
        tx.send(()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop on shutdown")
            .unwrap();
    }
}
