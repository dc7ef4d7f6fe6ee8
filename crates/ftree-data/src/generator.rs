#![forbid(unsafe_code)]

//! Row record generation.
//!
//! Each row sent to the client is a JSON object. The communicator writes the
//! hierarchy fields itself and then lets the attached [`DataGenerator`]s
//! contribute whatever the client columns need.

use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};

/// Contributes fields to the client record of an item.
pub trait DataGenerator<T> {
    /// Write fields for `item` into `record`.
    fn generate_data(&self, item: &T, record: &mut Map<String, Value>);

    /// The item is no longer on the client.
    fn destroy_data(&self, _item: &T) {}

    /// No item is on the client any more.
    fn destroy_all_data(&self) {}
}

/// Writes one named property computed from the item.
pub struct PropertyGenerator<T> {
    name: String,
    value: Rc<dyn Fn(&T) -> Value>,
}

impl<T> PropertyGenerator<T> {
    /// Property `name` computed by `value`.
    pub fn new(name: impl Into<String>, value: impl Fn(&T) -> Value + 'static) -> Self {
        Self {
            name: name.into(),
            value: Rc::new(value),
        }
    }
}

impl<T> DataGenerator<T> for PropertyGenerator<T> {
    fn generate_data(&self, item: &T, record: &mut Map<String, Value>) {
        record.insert(self.name.clone(), (self.value)(item));
    }
}

impl<T> fmt::Debug for PropertyGenerator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyGenerator")
            .field("name", &self.name)
            .finish()
    }
}

/// Fans out to registered generators in registration order.
pub struct CompositeDataGenerator<T> {
    generators: Vec<Rc<dyn DataGenerator<T>>>,
}

impl<T> CompositeDataGenerator<T> {
    /// Create an empty composite.
    #[must_use]
    pub fn new() -> Self {
        Self {
            generators: Vec::new(),
        }
    }

    /// Register a generator. Registering the same `Rc` twice is a no-op.
    pub fn add(&mut self, generator: Rc<dyn DataGenerator<T>>) {
        if !self.generators.iter().any(|g| Rc::ptr_eq(g, &generator)) {
            self.generators.push(generator);
        }
    }

    /// Unregister a generator. Returns whether it was registered.
    pub fn remove(&mut self, generator: &Rc<dyn DataGenerator<T>>) -> bool {
        let before = self.generators.len();
        self.generators.retain(|g| !Rc::ptr_eq(g, generator));
        self.generators.len() != before
    }

    /// Number of registered generators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.generators.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}

impl<T> Default for CompositeDataGenerator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DataGenerator<T> for CompositeDataGenerator<T> {
    fn generate_data(&self, item: &T, record: &mut Map<String, Value>) {
        for generator in &self.generators {
            generator.generate_data(item, record);
        }
    }

    fn destroy_data(&self, item: &T) {
        for generator in &self.generators {
            generator.destroy_data(item);
        }
    }

    fn destroy_all_data(&self) {
        for generator in &self.generators {
            generator.destroy_all_data();
        }
    }
}

impl<T> fmt::Debug for CompositeDataGenerator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeDataGenerator")
            .field("generators", &self.generators.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    struct Counting {
        destroyed: Cell<usize>,
    }

    impl DataGenerator<u32> for Counting {
        fn generate_data(&self, item: &u32, record: &mut Map<String, Value>) {
            record.insert("double".into(), json!(item * 2));
        }

        fn destroy_data(&self, _item: &u32) {
            self.destroyed.set(self.destroyed.get() + 1);
        }
    }

    #[test]
    fn composite_runs_generators_in_order() {
        let mut composite = CompositeDataGenerator::new();
        composite.add(Rc::new(PropertyGenerator::new("name", |i: &u32| json!(format!("n{i}")))));
        composite.add(Rc::new(PropertyGenerator::new("name", |_: &u32| json!("override"))));
        let mut record = Map::new();
        composite.generate_data(&4, &mut record);
        assert_eq!(Value::Object(record), json!({"name": "override"}));
    }

    #[test]
    fn add_is_idempotent_and_remove_works() {
        let counting: Rc<dyn DataGenerator<u32>> = Rc::new(Counting {
            destroyed: Cell::new(0),
        });
        let mut composite = CompositeDataGenerator::new();
        composite.add(Rc::clone(&counting));
        composite.add(Rc::clone(&counting));
        assert_eq!(composite.len(), 1);

        let mut record = Map::new();
        composite.generate_data(&21, &mut record);
        assert_eq!(record.get("double"), Some(&json!(42)));

        assert!(composite.remove(&counting));
        assert!(composite.is_empty());
        assert!(!composite.remove(&counting));
    }

    #[test]
    fn destroy_fans_out() {
        let counting = Rc::new(Counting {
            destroyed: Cell::new(0),
        });
        let mut composite = CompositeDataGenerator::new();
        composite.add(counting.clone());
        composite.destroy_data(&1);
        composite.destroy_data(&2);
        assert_eq!(counting.destroyed.get(), 2);
    }
}
