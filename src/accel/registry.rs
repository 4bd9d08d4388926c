use slotmap::{new_key_type, SlotMap};

use crate::error::SortError;
use crate::interop::MapFlags;

use super::SharedIndexMemory;

new_key_type! {
    /// Opaque handle to a rasterizer buffer registered with the compute device.
    pub struct ResourceKey;
}

struct Registration {
    memory: SharedIndexMemory,
    flags: MapFlags,
    mapped: bool,
}

/// Bounded table of external registrations. The bound models the driver-wide
/// limit on interop registrations.
pub(crate) struct Registry {
    entries: SlotMap<ResourceKey, Registration>,
    limit: usize,
}

impl Registry {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: SlotMap::with_key(),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn register(
        &mut self,
        memory: SharedIndexMemory,
        flags: MapFlags,
    ) -> Result<ResourceKey, SortError> {
        if self.entries.len() >= self.limit {
            return Err(SortError::RegistrationFailed {
                reason: format!("registration limit of {} reached", self.limit),
            });
        }

        Ok(self.entries.insert(Registration {
            memory,
            flags,
            mapped: false,
        }))
    }

    pub fn map(&mut self, key: ResourceKey) -> Result<(), SortError> {
        let entry = self.entries.get_mut(key).ok_or(SortError::UnknownResource)?;
        if entry.mapped {
            return Err(SortError::ResourceMapped);
        }
        entry.mapped = true;
        Ok(())
    }

    pub fn unmap(&mut self, key: ResourceKey) -> Result<(), SortError> {
        let entry = self.entries.get_mut(key).ok_or(SortError::UnknownResource)?;
        if !entry.mapped {
            return Err(SortError::ResourceNotMapped);
        }
        entry.mapped = false;
        Ok(())
    }

    pub fn mapped_memory(
        &self,
        key: ResourceKey,
    ) -> Result<(SharedIndexMemory, MapFlags), SortError> {
        let entry = self.entries.get(key).ok_or(SortError::UnknownResource)?;
        if !entry.mapped {
            return Err(SortError::ResourceNotMapped);
        }
        Ok((entry.memory.clone(), entry.flags))
    }

    /// Refuses to drop a registration that is still mapped.
    pub fn unregister(&mut self, key: ResourceKey) -> Result<(), SortError> {
        let entry = self.entries.get(key).ok_or(SortError::UnknownResource)?;
        if entry.mapped {
            return Err(SortError::ResourceMapped);
        }
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_enforced_and_released_slots_are_reusable() {
        let mut registry = Registry::new(2);
        let a = registry
            .register(SharedIndexMemory::host(4), MapFlags::None)
            .unwrap();
        let _b = registry
            .register(SharedIndexMemory::host(4), MapFlags::None)
            .unwrap();
        let err = registry
            .register(SharedIndexMemory::host(4), MapFlags::None)
            .unwrap_err();
        assert!(matches!(err, SortError::RegistrationFailed { .. }));

        registry.unregister(a).unwrap();
        assert_eq!(registry.len(), 1);
        registry
            .register(SharedIndexMemory::host(4), MapFlags::None)
            .expect("freed slot should be reusable");
    }

    #[test]
    fn mapped_registration_cannot_be_unregistered() {
        let mut registry = Registry::new(4);
        let key = registry
            .register(SharedIndexMemory::host(4), MapFlags::None)
            .unwrap();
        registry.map(key).unwrap();
        assert!(matches!(registry.map(key), Err(SortError::ResourceMapped)));
        assert!(matches!(
            registry.unregister(key),
            Err(SortError::ResourceMapped)
        ));

        registry.unmap(key).unwrap();
        assert!(matches!(
            registry.mapped_memory(key),
            Err(SortError::ResourceNotMapped)
        ));
        registry.unregister(key).unwrap();
        assert!(matches!(registry.map(key), Err(SortError::UnknownResource)));
    }

    #[test]
    fn mapped_memory_reports_flags() {
        let mut registry = Registry::new(1);
        let key = registry
            .register(SharedIndexMemory::host(3), MapFlags::ReadOnly)
            .unwrap();
        registry.map(key).unwrap();
        let (memory, flags) = registry.mapped_memory(key).unwrap();
        assert_eq!(flags, MapFlags::ReadOnly);
        assert_eq!(memory.byte_len(), 12);
    }
}
