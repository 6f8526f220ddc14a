//! Output configuration transactions
//!
//! A transaction collects per-device change-sets and is committed all at
//! once. Nothing staged here is visible on a device before apply, and a
//! failed validation leaves every device untouched.
//!
//! ```text
//! Open -> Staged* -> Applied
//!                 -> Failed     (validation rejected the batch)
//!                 -> Cancelled  (destroyed or client gone before apply)
//! ```

use crate::error::ConfigurationError;
use crate::output::device::{DeviceChanges, DeviceId, DeviceState, Transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Staged,
    Applied,
    Failed,
    Cancelled,
}

/// Staged batch of output changes owned by one configuration object
#[derive(Debug)]
pub struct OutputConfiguration {
    serial: u32,
    state: TransactionState,
    changes: Vec<(DeviceId, DeviceChanges)>,
}

impl OutputConfiguration {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            state: TransactionState::Open,
            changes: Vec::new(),
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Still accepting changes
    pub fn is_pending(&self) -> bool {
        matches!(self.state, TransactionState::Open | TransactionState::Staged)
    }

    /// Staged change-sets in first-staged order
    pub fn changes(&self) -> &[(DeviceId, DeviceChanges)] {
        &self.changes
    }

    pub fn changes_for(&self, device: DeviceId) -> Option<&DeviceChanges> {
        self.changes
            .iter()
            .find(|(id, _)| *id == device)
            .map(|(_, changes)| changes)
    }

    /// Merge one attribute change into the device's change-set.
    ///
    /// Re-staging an attribute overwrites the earlier value.
    pub fn stage(
        &mut self,
        device: DeviceId,
        change: impl FnOnce(&mut DeviceChanges),
    ) -> Result<(), ConfigurationError> {
        if !self.is_pending() {
            return Err(ConfigurationError::AlreadyApplied);
        }

        let index = match self.changes.iter().position(|(id, _)| *id == device) {
            Some(index) => index,
            None => {
                self.changes.push((device, DeviceChanges::default()));
                self.changes.len() - 1
            }
        };
        change(&mut self.changes[index].1);
        self.state = TransactionState::Staged;
        Ok(())
    }

    pub fn set_enabled(&mut self, device: DeviceId, enabled: bool) -> Result<(), ConfigurationError> {
        self.stage(device, |c| c.enabled = Some(enabled))
    }

    pub fn set_mode(&mut self, device: DeviceId, mode_id: i32) -> Result<(), ConfigurationError> {
        self.stage(device, |c| c.mode_id = Some(mode_id))
    }

    pub fn set_transform(
        &mut self,
        device: DeviceId,
        transform: Transform,
    ) -> Result<(), ConfigurationError> {
        self.stage(device, |c| c.transform = Some(transform))
    }

    pub fn set_position(&mut self, device: DeviceId, x: i32, y: i32) -> Result<(), ConfigurationError> {
        self.stage(device, |c| c.position = Some((x, y)))
    }

    pub fn set_scale(&mut self, device: DeviceId, scale: i32) -> Result<(), ConfigurationError> {
        self.stage(device, |c| c.scale = Some(scale))
    }

    /// Check every change-set against the live devices returned by `lookup`
    pub fn validate<'a, F>(&self, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(DeviceId) -> Option<&'a DeviceState>,
    {
        if !self.is_pending() {
            return Err(ConfigurationError::AlreadyApplied);
        }

        for (device, changes) in &self.changes {
            let state = lookup(*device).ok_or(ConfigurationError::UnknownDevice(*device))?;
            if let Some(mode_id) = changes.mode_id {
                if state.mode(mode_id).is_none() {
                    return Err(ConfigurationError::UnknownMode {
                        device: *device,
                        mode_id,
                    });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn mark_applied(&mut self) {
        self.state = TransactionState::Applied;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.state = TransactionState::Failed;
    }

    /// Abandon a pending transaction, returning false if it already finished
    pub fn cancel(&mut self) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.state = TransactionState::Cancelled;
        self.changes.clear();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::device::{ModeFlags, DEFAULT_REFRESH_RATE};

    fn two_mode_device() -> DeviceState {
        let mut state = DeviceState::new();
        state.add_mode(1920, 1080, DEFAULT_REFRESH_RATE, ModeFlags::PREFERRED);
        state.add_mode(1280, 720, DEFAULT_REFRESH_RATE, ModeFlags::empty());
        state
    }

    #[test]
    fn test_new_configuration_is_open() {
        let configuration = OutputConfiguration::new(7);
        assert_eq!(configuration.serial(), 7);
        assert_eq!(configuration.state(), TransactionState::Open);
        assert!(configuration.is_pending());
        assert!(configuration.changes().is_empty());
    }

    #[test]
    fn test_staging_merges_per_device() {
        let mut configuration = OutputConfiguration::new(1);
        configuration.set_enabled(DeviceId(2), false).unwrap();
        configuration.set_scale(DeviceId(1), 2).unwrap();
        configuration.set_position(DeviceId(2), 10, 20).unwrap();
        configuration.set_transform(DeviceId(2), Transform::Rotated180).unwrap();

        assert_eq!(configuration.state(), TransactionState::Staged);

        let devices: Vec<DeviceId> = configuration.changes().iter().map(|(id, _)| *id).collect();
        assert_eq!(devices, vec![DeviceId(2), DeviceId(1)]);

        let changes = configuration.changes_for(DeviceId(2)).unwrap();
        assert_eq!(changes.enabled, Some(false));
        assert_eq!(changes.position, Some((10, 20)));
        assert_eq!(changes.transform, Some(Transform::Rotated180));
        assert_eq!(changes.scale, None);
    }

    #[test]
    fn test_restaging_overwrites() {
        let mut configuration = OutputConfiguration::new(1);
        configuration.set_mode(DeviceId(1), 0).unwrap();
        configuration.set_mode(DeviceId(1), 1).unwrap();

        assert_eq!(configuration.changes().len(), 1);
        assert_eq!(configuration.changes_for(DeviceId(1)).unwrap().mode_id, Some(1));
    }

    #[test]
    fn test_validate_reports_unknown_device_and_mode() {
        let device = two_mode_device();
        let lookup = |id: DeviceId| (id == DeviceId(1)).then_some(&device);

        let mut configuration = OutputConfiguration::new(1);
        configuration.set_mode(DeviceId(1), 1).unwrap();
        assert_eq!(configuration.validate(lookup), Ok(()));

        configuration.set_mode(DeviceId(1), 5).unwrap();
        assert_eq!(
            configuration.validate(lookup),
            Err(ConfigurationError::UnknownMode {
                device: DeviceId(1),
                mode_id: 5
            })
        );

        let mut configuration = OutputConfiguration::new(2);
        configuration.set_enabled(DeviceId(9), true).unwrap();
        assert_eq!(
            configuration.validate(lookup),
            Err(ConfigurationError::UnknownDevice(DeviceId(9)))
        );
    }

    #[test]
    fn test_finished_configuration_rejects_changes() {
        let mut configuration = OutputConfiguration::new(1);
        configuration.set_scale(DeviceId(1), 2).unwrap();
        configuration.mark_applied();

        assert!(!configuration.is_pending());
        assert_eq!(
            configuration.set_scale(DeviceId(1), 3),
            Err(ConfigurationError::AlreadyApplied)
        );
        assert_eq!(
            configuration.validate(|_| None),
            Err(ConfigurationError::AlreadyApplied)
        );
        assert!(!configuration.cancel());
        assert_eq!(configuration.state(), TransactionState::Applied);
    }

    #[test]
    fn test_cancel_drops_staged_changes() {
        let mut configuration = OutputConfiguration::new(1);
        configuration.set_enabled(DeviceId(1), false).unwrap();

        assert!(configuration.cancel());
        assert_eq!(configuration.state(), TransactionState::Cancelled);
        assert!(configuration.changes().is_empty());
        assert!(configuration.set_enabled(DeviceId(1), true).is_err());
    }

    #[test]
    fn test_failed_configuration_is_final() {
        let mut configuration = OutputConfiguration::new(1);
        configuration.mark_failed();
        assert_eq!(configuration.state(), TransactionState::Failed);
        assert!(!configuration.is_pending());
        assert!(!configuration.cancel());
    }
}
