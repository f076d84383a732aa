//! The device registry: which devices are attached right now.
//!
//! The registry maps each attached device's [`Udid`] to its
//! [`DeviceDescriptor`].  It is fed by a single writer (the listener that
//! consumes `Attached` / `Detached` notifications) and read by everything that
//! needs to pick a device: the relay's connection handler, the device finder,
//! and the tunnel helper.
//!
//! # Attachment order
//!
//! Entries are kept in the order they were first attached.  When no specific
//! device is requested, callers get the *earliest-attached device that is
//! still present*.  Replacing the descriptor of an already-present UDID keeps
//! its position; detaching and reattaching moves it to the back.
//!
//! # Sharing
//!
//! [`SharedRegistry`] is the read-only handle every component receives.  The
//! mutation API lives on [`RegistryWriter`], which is handed to the listener
//! alone.  Both wrap the same `Arc<RwLock<DeviceRegistry>>`; locks are held
//! only for the duration of a single read or write, so readers always see a
//! whole snapshot.

use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::domain::device::{DeviceDescriptor, DeviceId, Udid};

/// No attached device satisfies a request.
///
/// Raised locally, before any daemon round trip.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectivityError {
    #[error("no devices connected")]
    NoDevices,
    #[error("requested device not connected: {udid}")]
    DeviceNotConnected { udid: Udid },
}

impl ConnectivityError {
    /// The error matching an unsatisfied `pin`.
    pub fn for_pin(pin: Option<&str>) -> Self {
        match pin {
            Some(udid) => ConnectivityError::DeviceNotConnected {
                udid: udid.to_string(),
            },
            None => ConnectivityError::NoDevices,
        }
    }
}

/// Whether `udid` satisfies an optional pin.  No pin accepts any device.
pub fn pin_matches(pin: Option<&str>, udid: &str) -> bool {
    pin.map_or(true, |wanted| wanted == udid)
}

/// Ordered map from UDID to descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRegistry {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Looks a device up by its UDID.
    pub fn get(&self, udid: &str) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.serial_number == udid)
    }

    pub fn contains(&self, udid: &str) -> bool {
        self.get(udid).is_some()
    }

    /// Reverse lookup by session handle.  Linear scan.
    pub fn find_by_device_id(&self, device_id: DeviceId) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    /// Inserts `device`, or replaces the entry with the same UDID in place.
    ///
    /// Returns the replaced descriptor, if any.
    pub fn upsert(&mut self, device: DeviceDescriptor) -> Option<DeviceDescriptor> {
        match self
            .devices
            .iter_mut()
            .find(|d| d.serial_number == device.serial_number)
        {
            Some(slot) => Some(std::mem::replace(slot, device)),
            None => {
                self.devices.push(device);
                None
            }
        }
    }

    /// Removes the entry for `udid`.
    pub fn remove(&mut self, udid: &str) -> Option<DeviceDescriptor> {
        let index = self.devices.iter().position(|d| d.serial_number == udid)?;
        Some(self.devices.remove(index))
    }

    /// UDIDs in attachment order.
    pub fn udids(&self) -> Vec<Udid> {
        self.devices.iter().map(|d| d.serial_number.clone()).collect()
    }

    /// The earliest-attached device still present.
    pub fn earliest(&self) -> Option<&DeviceDescriptor> {
        self.devices.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.iter()
    }

    /// Picks the device a request should target.
    ///
    /// With a pin, that exact UDID; without, the earliest-attached device.
    ///
    /// # Errors
    ///
    /// [`ConnectivityError::NoDevices`] when the registry is empty,
    /// [`ConnectivityError::DeviceNotConnected`] when the pinned UDID is
    /// absent.
    pub fn select(&self, pin: Option<&str>) -> Result<&DeviceDescriptor, ConnectivityError> {
        if self.is_empty() {
            return Err(ConnectivityError::NoDevices);
        }
        match pin {
            Some(udid) => self.get(udid).ok_or_else(|| ConnectivityError::for_pin(pin)),
            None => self.earliest().ok_or(ConnectivityError::NoDevices),
        }
    }

    /// Whether any present device satisfies `pin`.
    pub fn satisfies(&self, pin: Option<&str>) -> bool {
        self.select(pin).is_ok()
    }
}

// ── Shared handles ────────────────────────────────────────────────────────────

/// Read-only, cloneable handle to a registry.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<RwLock<DeviceRegistry>>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the current contents under a read lock.
    pub fn read<R>(&self, f: impl FnOnce(&DeviceRegistry) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&*guard)
    }

    /// A copy of the current contents.
    pub fn snapshot(&self) -> DeviceRegistry {
        self.read(Clone::clone)
    }

    /// Convenience for `read(|r| r.select(pin).cloned())`.
    ///
    /// # Errors
    ///
    /// See [`DeviceRegistry::select`].
    pub fn select(&self, pin: Option<&str>) -> Result<DeviceDescriptor, ConnectivityError> {
        self.read(|r| r.select(pin).cloned())
    }

    /// Creates the write capability for this registry.
    ///
    /// Hand the result to exactly one listener.
    pub fn writer(&self) -> RegistryWriter {
        RegistryWriter {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Mutation capability for a [`SharedRegistry`].  Deliberately not `Clone`.
#[derive(Debug)]
pub struct RegistryWriter {
    inner: Arc<RwLock<DeviceRegistry>>,
}

impl RegistryWriter {
    /// Runs `f` against the current contents under a read lock.
    pub fn read<R>(&self, f: impl FnOnce(&DeviceRegistry) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&*guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut DeviceRegistry) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard)
    }

    /// Records an attached device, keyed by its UDID.
    pub fn upsert(&self, device: DeviceDescriptor) -> Option<DeviceDescriptor> {
        self.write(|r| r.upsert(device))
    }

    pub fn remove(&self, udid: &str) -> Option<DeviceDescriptor> {
        self.write(|r| r.remove(udid))
    }

    /// A read-only handle onto the same registry.
    pub fn shared(&self) -> SharedRegistry {
        SharedRegistry {
            inner: Arc::clone(&self.inner),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn device(udid: &str, device_id: DeviceId) -> DeviceDescriptor {
        DeviceDescriptor {
            connection_type: "USB".to_string(),
            device_id,
            location_id: Some(0x1410_0000),
            product_id: Some(0x12a8),
            serial_number: udid.to_string(),
        }
    }

    #[test]
    fn test_registry_starts_empty() {
        let registry = DeviceRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.udids().is_empty());
        assert_eq!(registry.earliest(), None);
    }

    #[test]
    fn test_upsert_adds_device() {
        let mut registry = DeviceRegistry::new();
        assert_eq!(registry.upsert(device("ABC", 7)), None);
        assert_eq!(registry.get("ABC").map(|d| d.device_id), Some(7));
    }

    #[test]
    fn test_upsert_replaces_in_place_and_keeps_order() {
        // Arrange
        let mut registry = DeviceRegistry::new();
        registry.upsert(device("first", 1));
        registry.upsert(device("second", 2));

        // Act: new session handle for the first device
        let replaced = registry.upsert(device("first", 10));

        // Assert
        assert_eq!(replaced.map(|d| d.device_id), Some(1));
        assert_eq!(registry.udids(), vec!["first", "second"]);
        assert_eq!(registry.get("first").map(|d| d.device_id), Some(10));
    }

    #[test]
    fn test_find_by_device_id_does_reverse_lookup() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(device("A", 1));
        registry.upsert(device("B", 2));
        assert_eq!(registry.find_by_device_id(2).map(|d| d.udid()), Some("B"));
        assert_eq!(registry.find_by_device_id(3), None);
    }

    #[test]
    fn test_remove_deletes_device() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(device("A", 1));
        assert!(registry.remove("A").is_some());
        assert!(!registry.contains("A"));
        assert_eq!(registry.remove("A"), None);
    }

    #[test]
    fn test_earliest_is_first_attached_still_present() {
        // Arrange
        let mut registry = DeviceRegistry::new();
        registry.upsert(device("A", 1));
        registry.upsert(device("B", 2));
        registry.upsert(device("C", 3));

        // Act
        registry.remove("A");
        registry.upsert(device("A", 4));

        // Assert: A re-attached, so B is now the earliest
        assert_eq!(registry.earliest().map(|d| d.udid()), Some("B"));
        assert_eq!(registry.udids(), vec!["B", "C", "A"]);
    }

    #[test]
    fn test_select_empty_registry_is_no_devices() {
        let registry = DeviceRegistry::new();
        assert_eq!(registry.select(None), Err(ConnectivityError::NoDevices));
        assert_eq!(registry.select(Some("A")), Err(ConnectivityError::NoDevices));
    }

    #[test]
    fn test_select_pinned_absent_is_device_not_connected() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(device("A", 1));
        assert_eq!(
            registry.select(Some("Z")),
            Err(ConnectivityError::DeviceNotConnected {
                udid: "Z".to_string()
            })
        );
    }

    #[test]
    fn test_select_pinned_present_returns_that_device() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(device("A", 1));
        registry.upsert(device("B", 2));
        assert_eq!(registry.select(Some("B")).map(|d| d.device_id), Ok(2));
    }

    #[test]
    fn test_select_unpinned_returns_earliest() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(device("A", 1));
        registry.upsert(device("B", 2));
        assert_eq!(registry.select(None).map(|d| d.udid()), Ok("A"));
    }

    #[test]
    fn test_pin_matches() {
        assert!(pin_matches(None, "anything"));
        assert!(pin_matches(Some("A"), "A"));
        assert!(!pin_matches(Some("A"), "B"));
    }

    #[test]
    fn test_connectivity_error_messages() {
        assert_eq!(ConnectivityError::NoDevices.to_string(), "no devices connected");
        assert_eq!(
            ConnectivityError::for_pin(Some("XYZ")).to_string(),
            "requested device not connected: XYZ"
        );
    }

    #[test]
    fn test_writer_mutations_are_visible_through_shared_handle() {
        // Arrange
        let shared = SharedRegistry::new();
        let writer = shared.writer();

        // Act
        writer.upsert(device("ABC", 7));

        // Assert
        assert_eq!(shared.select(None).map(|d| d.device_id), Ok(7));
        writer.remove("ABC");
        assert!(shared.snapshot().is_empty());
    }

    #[test]
    fn test_separate_registries_are_independent() {
        let one = SharedRegistry::new();
        let two = SharedRegistry::new();
        one.writer().upsert(device("A", 1));
        assert!(two.snapshot().is_empty());
    }
}
