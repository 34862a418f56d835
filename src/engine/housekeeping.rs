use std::collections::{HashMap, VecDeque};

use ulid::Ulid;

use crate::config::Settings;
use crate::limits::{BOOKED_TASK_LEAD_MS, MAX_COMPLETED_TASKS};
use crate::model::*;

use super::conflict::check_record_room;
use super::{Engine, EngineError};

/// Request to put a task on the board by hand.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub unit: UnitId,
    pub reference: Option<String>,
    pub reservation_status: ReservationStatus,
    pub notes: Option<String>,
}

type TaskKey = (UnitId, Option<String>);

/// Housekeeping tasks. At most one active task per (unit, reference).
/// Only the most recent completed tasks are kept.
#[derive(Debug)]
pub struct TaskBoard {
    active: HashMap<Ulid, HousekeepingTask>,
    by_key: HashMap<TaskKey, Ulid>,
    completed: HashMap<Ulid, HousekeepingTask>,
    /// Completion order, oldest first.
    completed_order: VecDeque<Ulid>,
    completed_cap: usize,
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self::with_completed_cap(MAX_COMPLETED_TASKS)
    }
}

impl TaskBoard {
    pub fn with_completed_cap(completed_cap: usize) -> Self {
        Self {
            active: HashMap::new(),
            by_key: HashMap::new(),
            completed: HashMap::new(),
            completed_order: VecDeque::new(),
            completed_cap,
        }
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::TaskCreated { task } => {
                if task.is_active() {
                    self.by_key
                        .insert((task.unit.clone(), task.reference.clone()), task.id);
                    self.active.insert(task.id, task.clone());
                } else {
                    self.retire(task.clone());
                }
            }
            Event::TaskStarted { id, at } => {
                if let Some(task) = self.active.get_mut(id) {
                    task.status = TaskStatus::InProgress;
                    task.actual_start = Some(*at);
                }
            }
            Event::TaskCompleted { id, at } => {
                if let Some(mut task) = self.take_active(id) {
                    task.status = TaskStatus::Completed;
                    task.actual_end = Some(*at);
                    self.retire(task);
                }
            }
            Event::TaskDeleted { id } => {
                self.take_active(id);
            }
            _ => {}
        }
    }

    fn retire(&mut self, task: HousekeepingTask) {
        if self.completed.insert(task.id, task.clone()).is_none() {
            self.completed_order.push_back(task.id);
        }
        while self.completed_order.len() > self.completed_cap {
            if let Some(oldest) = self.completed_order.pop_front() {
                self.completed.remove(&oldest);
            }
        }
    }

    fn take_active(&mut self, id: &Ulid) -> Option<HousekeepingTask> {
        let task = self.active.remove(id)?;
        self.by_key.remove(&(task.unit.clone(), task.reference.clone()));
        Some(task)
    }

    pub fn find_active(&self, unit: &str, reference: Option<&str>) -> Option<&HousekeepingTask> {
        let key = (unit.to_string(), reference.map(str::to_string));
        self.by_key.get(&key).and_then(|id| self.active.get(id))
    }

    pub fn get(&self, id: &Ulid) -> Option<&HousekeepingTask> {
        self.active.get(id).or_else(|| self.completed.get(id))
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub(super) fn snapshot_events(&self) -> Vec<Event> {
        let completed = self.completed_order.iter().filter_map(|id| self.completed.get(id));
        completed
            .chain(self.active.values())
            .map(|task| Event::TaskCreated { task: task.clone() })
            .collect()
    }
}

fn expected_end(settings: &Settings, start: Ms) -> Option<Ms> {
    (!settings.manual_housekeeping_control).then(|| start + settings.buffer_ms())
}

#[allow(clippy::too_many_arguments)]
fn new_task(
    unit: &str,
    reference: Option<String>,
    reservation_status: ReservationStatus,
    status: TaskStatus,
    start: Ms,
    settings: &Settings,
    notes: Option<String>,
    now: Ms,
) -> HousekeepingTask {
    HousekeepingTask {
        id: Ulid::new(),
        unit: unit.to_string(),
        reference,
        reservation_status,
        status,
        expected_start: start,
        expected_end: expected_end(settings, start),
        actual_start: None,
        actual_end: None,
        notes,
        created_at: now,
    }
}

impl Engine {
    /// Open the turnover task for a departure and put the unit on a turnover
    /// hold. Calling it again for the same departure returns the open task.
    pub async fn on_checkout(&self, unit_id: &str, reference: &str, now: Ms) -> Result<HousekeepingTask, EngineError> {
        let _gate = self.gate.read().await;
        self.open_turnover(unit_id, reference, now).await
    }

    /// Block a unit for maintenance starting after its last scheduled departure.
    pub async fn on_maintenance_requested(
        &self,
        unit_id: &str,
        reference: Option<String>,
        notes: Option<String>,
        now: Ms,
    ) -> Result<HousekeepingTask, EngineError> {
        let _gate = self.gate.read().await;
        self.open_maintenance(unit_id, reference, notes, now).await
    }

    pub async fn schedule_task(&self, req: NewTask, now: Ms) -> Result<HousekeepingTask, EngineError> {
        if req.notes.as_ref().is_some_and(|n| n.len() > crate::limits::MAX_NOTES_LEN) {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        let _gate = self.gate.read().await;
        match req.reservation_status {
            ReservationStatus::CheckOut => {
                let reference = req
                    .reference
                    .ok_or_else(|| EngineError::Validation("turnover task needs a booking reference".into()))?;
                self.open_turnover(&req.unit, &reference, now).await
            }
            ReservationStatus::Maintenance => self.open_maintenance(&req.unit, req.reference, req.notes, now).await,
            ReservationStatus::Booked => {
                self.check_lead_time(&req, now).await?;
                self.open_plain(req, now).await
            }
            ReservationStatus::CheckIn | ReservationStatus::Available => self.open_plain(req, now).await,
        }
    }

    pub(super) async fn open_turnover(
        &self,
        unit_id: &str,
        reference: &str,
        now: Ms,
    ) -> Result<HousekeepingTask, EngineError> {
        let settings = self.settings().await;
        let shared = self.unit_or_not_found(unit_id)?;
        let mut board = self.tasks.lock().await;
        if let Some(existing) = board.find_active(unit_id, Some(reference)) {
            return Ok(existing.clone());
        }

        {
            let mut unit = shared.write().await;
            if unit.record(reference).is_none() {
                check_record_room(&unit)?;
            }
            let event = Event::TurnoverOpened {
                unit: unit_id.to_string(),
                reference: reference.to_string(),
                since: day_of(now),
            };
            self.persist_unit(&mut unit, event).await?;
        }

        let task = new_task(
            unit_id,
            Some(reference.to_string()),
            ReservationStatus::CheckOut,
            TaskStatus::Pending,
            now,
            &settings,
            None,
            now,
        );
        self.wal_append(&Event::TaskCreated { task: task.clone() }).await?;
        board.apply(&Event::TaskCreated { task: task.clone() });
        metrics::gauge!(crate::observability::TASKS_OPEN).set(board.active_len() as f64);
        tracing::info!("turnover task {} opened for room {unit_id} after {reference}", task.id);
        Ok(task)
    }

    pub(super) async fn open_maintenance(
        &self,
        unit_id: &str,
        reference: Option<String>,
        notes: Option<String>,
        now: Ms,
    ) -> Result<HousekeepingTask, EngineError> {
        let settings = self.settings().await;
        let shared = self.unit_or_not_found(unit_id)?;
        let reference = reference.unwrap_or_else(|| format!("MAINT-{now}"));
        let mut board = self.tasks.lock().await;
        if board.find_active(unit_id, Some(&reference)).is_some() {
            return Err(EngineError::AlreadyExists(format!("active task for room {unit_id} / {reference}")));
        }

        let start = {
            let mut unit = shared.write().await;
            check_record_room(&unit)?;
            if unit.record(&reference).is_some() {
                return Err(EngineError::AlreadyExists(format!("{reference} on room {unit_id}")));
            }
            // Never pre-empt a stay already on the books.
            let start = match unit.latest_checkout_from(day_of(now)) {
                Some(departure) => now.max(instant_at(departure, settings.check_out_time)),
                None => now,
            };
            let event = Event::OccupancyAdded {
                unit: unit_id.to_string(),
                record: OccupancyRecord::hold(reference.clone(), day_of(start), HoldReason::Maintenance),
            };
            self.persist_unit(&mut unit, event).await?;
            start
        };

        let task = new_task(
            unit_id,
            Some(reference),
            ReservationStatus::Maintenance,
            TaskStatus::Maintenance,
            start,
            &settings,
            notes,
            now,
        );
        self.wal_append(&Event::TaskCreated { task: task.clone() }).await?;
        board.apply(&Event::TaskCreated { task: task.clone() });
        metrics::gauge!(crate::observability::TASKS_OPEN).set(board.active_len() as f64);
        tracing::info!("maintenance task {} on room {unit_id} from {}", task.id, day_of(start));
        Ok(task)
    }

    /// A prep task for an arrival must leave enough time before check-in.
    async fn check_lead_time(&self, req: &NewTask, now: Ms) -> Result<(), EngineError> {
        let reference = req
            .reference
            .as_deref()
            .ok_or_else(|| EngineError::Validation("arrival task needs a booking reference".into()))?;
        let booking = self.booking_by_reference(reference).await?;
        if !booking.units().any(|u| *u == req.unit) {
            return Err(EngineError::Validation(format!(
                "booking {reference} does not include room {}",
                req.unit
            )));
        }
        let remaining = booking.arrives_at(&self.settings().await) - now;
        if remaining < BOOKED_TASK_LEAD_MS {
            return Err(EngineError::LeadTime {
                remaining_ms: remaining,
                required_ms: BOOKED_TASK_LEAD_MS,
            });
        }
        Ok(())
    }

    async fn open_plain(&self, req: NewTask, now: Ms) -> Result<HousekeepingTask, EngineError> {
        let settings = self.settings().await;
        self.unit_or_not_found(&req.unit)?;
        let mut board = self.tasks.lock().await;
        if board.find_active(&req.unit, req.reference.as_deref()).is_some() {
            return Err(EngineError::AlreadyExists(format!(
                "active task for room {} / {}",
                req.unit,
                req.reference.as_deref().unwrap_or("-")
            )));
        }
        let task = new_task(
            &req.unit,
            req.reference,
            req.reservation_status,
            TaskStatus::Pending,
            now,
            &settings,
            req.notes,
            now,
        );
        self.wal_append(&Event::TaskCreated { task: task.clone() }).await?;
        board.apply(&Event::TaskCreated { task: task.clone() });
        metrics::gauge!(crate::observability::TASKS_OPEN).set(board.active_len() as f64);
        Ok(task)
    }

    pub async fn start_task(&self, id: Ulid, now: Ms) -> Result<HousekeepingTask, EngineError> {
        let _gate = self.gate.read().await;
        let mut board = self.tasks.lock().await;
        let Some(task) = board.active.get(&id) else {
            if board.completed.contains_key(&id) {
                return Err(EngineError::Validation(format!("task {id} is already completed")));
            }
            return Err(EngineError::not_found("task", id));
        };
        if task.status == TaskStatus::InProgress {
            return Ok(task.clone());
        }
        let event = Event::TaskStarted { id, at: now };
        self.wal_append(&event).await?;
        board.apply(&event);
        board.get(&id).cloned().ok_or_else(|| EngineError::not_found("task", id))
    }

    /// Complete a task. Turnover and maintenance tasks hand the unit back by
    /// pulling their hold. Completing twice returns the completed task.
    pub async fn complete_task(&self, id: Ulid, now: Ms) -> Result<HousekeepingTask, EngineError> {
        let _gate = self.gate.read().await;
        let mut board = self.tasks.lock().await;
        if let Some(done) = board.completed.get(&id) {
            return Ok(done.clone());
        }
        let task = board
            .active
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("task", id))?;

        if task.holds_unit()
            && let Some(reference) = &task.reference
        {
            let shared = self.unit_or_not_found(&task.unit)?;
            let mut unit = shared.write().await;
            if unit.record(reference).is_some() {
                let event = Event::OccupancyReleased {
                    unit: task.unit.clone(),
                    reference: reference.clone(),
                };
                self.persist_unit(&mut unit, event).await?;
            }
        }

        let event = Event::TaskCompleted { id, at: now };
        self.wal_append(&event).await?;
        board.apply(&event);
        metrics::gauge!(crate::observability::TASKS_OPEN).set(board.active_len() as f64);
        tracing::info!("task {id} completed, room {} released", task.unit);
        board.get(&id).cloned().ok_or_else(|| EngineError::not_found("task", id))
    }

    /// Remove an active task. Any hold it placed stays until released
    /// explicitly with [`Engine::release`].
    pub async fn delete_task(&self, id: Ulid) -> Result<HousekeepingTask, EngineError> {
        let _gate = self.gate.read().await;
        let mut board = self.tasks.lock().await;
        let task = board
            .active
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("task", id))?;
        let event = Event::TaskDeleted { id };
        self.wal_append(&event).await?;
        board.apply(&event);
        metrics::gauge!(crate::observability::TASKS_OPEN).set(board.active_len() as f64);
        if task.holds_unit() {
            tracing::warn!(
                "task {id} deleted; hold {} on room {} stays until released",
                task.reference.as_deref().unwrap_or("-"),
                task.unit
            );
        }
        Ok(task)
    }

    pub async fn task(&self, id: Ulid) -> Option<HousekeepingTask> {
        self.tasks.lock().await.get(&id).cloned()
    }

    /// Active tasks, optionally for one unit, earliest expected start first.
    pub async fn active_tasks(&self, unit: Option<&str>) -> Vec<HousekeepingTask> {
        let board = self.tasks.lock().await;
        let mut tasks: Vec<HousekeepingTask> = board
            .active
            .values()
            .filter(|t| unit.is_none_or(|u| t.unit == u))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.expected_start, t.id));
        tasks
    }
}
