use std::collections::HashMap;
use std::sync::Mutex;

/// Interns device names into small integer ids. First entry is always
/// `"unknown"` at id `0`; ids are assigned on first sight, monotonic, and
/// never recycled.
pub struct DeviceRegistry {
    inner: Mutex<Inner>,
}

struct Inner {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let mut ids = HashMap::new();
        ids.insert("unknown".to_string(), 0);
        Self {
            inner: Mutex::new(Inner {
                names: vec!["unknown".to_string()],
                ids,
            }),
        }
    }

    /// Look up or assign an id for `name`, interning it if this is the
    /// first time it has been seen.
    pub fn intern(&self, name: &str) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&id) = inner.ids.get(name) {
            return id;
        }
        let id = inner.names.len() as u32;
        inner.names.push(name.to_string());
        inner.ids.insert(name.to_string(), id);
        id
    }

    pub fn name(&self, id: u32) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.names.get(id as usize).cloned()
    }

    pub fn id_for(&self, name: &str) -> Option<u32> {
        let inner = self.inner.lock().unwrap();
        inner.ids.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_is_zero() {
        let registry = DeviceRegistry::new();
        assert_eq!(registry.id_for("unknown"), Some(0));
        assert_eq!(registry.name(0), Some("unknown".to_string()));
    }

    #[test]
    fn interns_monotonically() {
        let registry = DeviceRegistry::new();
        let a = registry.intern("G6 Native / G5 Native");
        let b = registry.intern("llu ingester");
        let a_again = registry.intern("G6 Native / G5 Native");
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(a_again, a);
        assert_eq!(registry.len(), 3);
    }
}
