//! In-memory storage with snapshot reads and all-or-nothing write transactions.
//!
//! Readers get an immutable snapshot, so a query never observes a half-applied
//! write. Writers are serialized and work on a private copy that replaces the
//! current tables only when the transaction closure returns `Ok`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::{
    AttendanceId, AttendanceRecord, BlockId, CalendarBlock, InstanceId, OverrideInstance,
    ParticipantId, Series, SeriesId,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{table} row {id} not found")]
    NotFound { table: &'static str, id: i64 },
    #[error("unique constraint {constraint} violated")]
    UniqueViolation { constraint: &'static str },
}

const OCCURRENCE_CONSTRAINT: &str = "uq_instance_series_occurrence_date";
const ATTENDANCE_CONSTRAINT: &str = "uq_attendance_instance_participant";

#[derive(Debug, Clone, Default)]
pub struct Tables {
    next_id: i64,
    series: BTreeMap<SeriesId, Series>,
    instances: BTreeMap<InstanceId, OverrideInstance>,
    occurrence_keys: HashMap<(SeriesId, NaiveDate), InstanceId>,
    attendance: BTreeMap<AttendanceId, AttendanceRecord>,
    attendance_keys: HashMap<(InstanceId, ParticipantId), AttendanceId>,
    blocks: BTreeMap<BlockId, CalendarBlock>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn insert_series(&mut self, mut series: Series) -> SeriesId {
        series.id = self.allocate_id();
        let id = series.id;
        self.series.insert(id, series);
        id
    }

    pub fn series(&self, id: SeriesId) -> Result<&Series, StoreError> {
        self.series.get(&id).ok_or(StoreError::NotFound {
            table: "series",
            id,
        })
    }

    pub fn series_mut(&mut self, id: SeriesId) -> Result<&mut Series, StoreError> {
        self.series.get_mut(&id).ok_or(StoreError::NotFound {
            table: "series",
            id,
        })
    }

    pub fn all_series(&self) -> impl Iterator<Item = &Series> {
        self.series.values()
    }

    /// Removes the series with its override instances and their attendance.
    pub fn delete_series(&mut self, id: SeriesId) -> Result<Series, StoreError> {
        let series = self.series.remove(&id).ok_or(StoreError::NotFound {
            table: "series",
            id,
        })?;
        for instance_id in self.instance_ids_of(id) {
            self.delete_instance(instance_id)?;
        }
        Ok(series)
    }

    pub fn insert_instance(
        &mut self,
        mut instance: OverrideInstance,
    ) -> Result<InstanceId, StoreError> {
        self.series(instance.series_id)?;
        let key = (instance.series_id, instance.original_date);
        if self.occurrence_keys.contains_key(&key) {
            return Err(StoreError::UniqueViolation {
                constraint: OCCURRENCE_CONSTRAINT,
            });
        }
        instance.id = self.allocate_id();
        let id = instance.id;
        self.occurrence_keys.insert(key, id);
        self.instances.insert(id, instance);
        Ok(id)
    }

    pub fn instance(&self, id: InstanceId) -> Result<&OverrideInstance, StoreError> {
        self.instances.get(&id).ok_or(StoreError::NotFound {
            table: "override_instance",
            id,
        })
    }

    /// Mutable access for non-key columns. `series_id` and `original_date` change
    /// only through [`Tables::reparent_instance`] and [`Tables::rekey_instance`].
    pub fn instance_mut(&mut self, id: InstanceId) -> Result<&mut OverrideInstance, StoreError> {
        self.instances.get_mut(&id).ok_or(StoreError::NotFound {
            table: "override_instance",
            id,
        })
    }

    pub fn instance_for(&self, series_id: SeriesId, date: NaiveDate) -> Option<&OverrideInstance> {
        self.occurrence_keys
            .get(&(series_id, date))
            .and_then(|id| self.instances.get(id))
    }

    pub fn instances(&self) -> impl Iterator<Item = &OverrideInstance> {
        self.instances.values()
    }

    pub fn instance_ids_of(&self, series_id: SeriesId) -> Vec<InstanceId> {
        self.instances
            .values()
            .filter(|instance| instance.series_id == series_id)
            .map(|instance| instance.id)
            .collect()
    }

    pub fn reparent_instance(
        &mut self,
        id: InstanceId,
        series_id: SeriesId,
    ) -> Result<(), StoreError> {
        self.series(series_id)?;
        let (old_key, new_key) = {
            let instance = self.instance(id)?;
            (
                (instance.series_id, instance.original_date),
                (series_id, instance.original_date),
            )
        };
        if old_key == new_key {
            return Ok(());
        }
        if self.occurrence_keys.contains_key(&new_key) {
            return Err(StoreError::UniqueViolation {
                constraint: OCCURRENCE_CONSTRAINT,
            });
        }
        self.occurrence_keys.remove(&old_key);
        self.occurrence_keys.insert(new_key, id);
        self.instance_mut(id)?.series_id = series_id;
        Ok(())
    }

    pub fn rekey_instance(
        &mut self,
        id: InstanceId,
        original_date: NaiveDate,
    ) -> Result<(), StoreError> {
        let (old_key, new_key) = {
            let instance = self.instance(id)?;
            (
                (instance.series_id, instance.original_date),
                (instance.series_id, original_date),
            )
        };
        if old_key == new_key {
            return Ok(());
        }
        if self.occurrence_keys.contains_key(&new_key) {
            return Err(StoreError::UniqueViolation {
                constraint: OCCURRENCE_CONSTRAINT,
            });
        }
        self.occurrence_keys.remove(&old_key);
        self.occurrence_keys.insert(new_key, id);
        self.instance_mut(id)?.original_date = original_date;
        Ok(())
    }

    /// Removes the instance and its attendance records.
    pub fn delete_instance(&mut self, id: InstanceId) -> Result<OverrideInstance, StoreError> {
        let instance = self.instances.remove(&id).ok_or(StoreError::NotFound {
            table: "override_instance",
            id,
        })?;
        self.occurrence_keys
            .remove(&(instance.series_id, instance.original_date));
        let participants: Vec<ParticipantId> = self
            .attendance_of(id)
            .map(|record| record.participant_id)
            .collect();
        for participant_id in participants {
            self.delete_attendance(id, participant_id);
        }
        Ok(instance)
    }

    pub fn insert_attendance(
        &mut self,
        mut record: AttendanceRecord,
    ) -> Result<AttendanceId, StoreError> {
        self.instance(record.instance_id)?;
        let key = (record.instance_id, record.participant_id);
        if self.attendance_keys.contains_key(&key) {
            return Err(StoreError::UniqueViolation {
                constraint: ATTENDANCE_CONSTRAINT,
            });
        }
        record.id = self.allocate_id();
        let id = record.id;
        self.attendance_keys.insert(key, id);
        self.attendance.insert(id, record);
        Ok(id)
    }

    pub fn attendance_for(
        &self,
        instance_id: InstanceId,
        participant_id: ParticipantId,
    ) -> Option<&AttendanceRecord> {
        self.attendance_keys
            .get(&(instance_id, participant_id))
            .and_then(|id| self.attendance.get(id))
    }

    pub fn attendance_for_mut(
        &mut self,
        instance_id: InstanceId,
        participant_id: ParticipantId,
    ) -> Option<&mut AttendanceRecord> {
        let id = self.attendance_keys.get(&(instance_id, participant_id))?;
        self.attendance.get_mut(id)
    }

    pub fn delete_attendance(
        &mut self,
        instance_id: InstanceId,
        participant_id: ParticipantId,
    ) -> Option<AttendanceRecord> {
        let id = self
            .attendance_keys
            .remove(&(instance_id, participant_id))?;
        self.attendance.remove(&id)
    }

    pub fn attendance_of(&self, instance_id: InstanceId) -> impl Iterator<Item = &AttendanceRecord> {
        self.attendance
            .values()
            .filter(move |record| record.instance_id == instance_id)
    }

    pub fn attendance_of_participant(
        &self,
        participant_id: ParticipantId,
    ) -> impl Iterator<Item = &AttendanceRecord> {
        self.attendance
            .values()
            .filter(move |record| record.participant_id == participant_id)
    }

    pub fn insert_block(&mut self, mut block: CalendarBlock) -> BlockId {
        block.id = self.allocate_id();
        let id = block.id;
        self.blocks.insert(id, block);
        id
    }

    pub fn block(&self, id: BlockId) -> Result<&CalendarBlock, StoreError> {
        self.blocks.get(&id).ok_or(StoreError::NotFound {
            table: "calendar_block",
            id,
        })
    }

    pub fn blocks(&self) -> impl Iterator<Item = &CalendarBlock> {
        self.blocks.values()
    }

    pub fn delete_block(&mut self, id: BlockId) -> Result<CalendarBlock, StoreError> {
        self.blocks.remove(&id).ok_or(StoreError::NotFound {
            table: "calendar_block",
            id,
        })
    }
}

#[derive(Debug, Default)]
pub struct Store {
    current: RwLock<Arc<Tables>>,
    writer: Mutex<()>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<Tables> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Runs `apply` against a private copy of the tables and publishes it only on success.
    pub fn transaction<T, E>(
        &self,
        apply: impl FnOnce(&mut Tables) -> Result<T, E>,
    ) -> Result<T, E> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut working = Tables::clone(&self.snapshot());
        let value = apply(&mut working)?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(working);
        Ok(value)
    }
}
