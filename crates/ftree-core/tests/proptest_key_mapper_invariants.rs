//! Property-based invariant tests for `KeyMapper`.
//!
//! 1. Keys and items stay a bijection under any allocate/release sequence.
//! 2. A key is stable across repeated `key()` calls until released.
//! 3. Counter keys are never reissued after release.

use std::collections::{HashMap, HashSet};

use ftree_core::KeyMapper;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Key(u8),
    Remove(u8),
    RemoveAll,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => any::<u8>().prop_map(|i| Op::Key(i % 32)),
        3 => any::<u8>().prop_map(|i| Op::Remove(i % 32)),
        1 => Just(Op::RemoveAll),
    ]
}

proptest! {
    #[test]
    fn keys_form_a_bijection(ops in prop::collection::vec(op(), 0..200)) {
        let mut mapper = KeyMapper::new();
        let mut model: HashMap<u8, String> = HashMap::new();
        let mut ever_issued: HashSet<String> = HashSet::new();

        for op in ops {
            match op {
                Op::Key(item) => {
                    let key = mapper.key(&item);
                    match model.get(&item) {
                        Some(existing) => prop_assert_eq!(existing, &key),
                        None => {
                            prop_assert!(ever_issued.insert(key.clone()), "key {} reissued", key);
                            model.insert(item, key);
                        }
                    }
                }
                Op::Remove(item) => {
                    let released = mapper.remove(&item);
                    prop_assert_eq!(released, model.remove(&item));
                }
                Op::RemoveAll => {
                    mapper.remove_all();
                    model.clear();
                }
            }

            prop_assert_eq!(mapper.len(), model.len());
            for (item, key) in &model {
                prop_assert_eq!(mapper.get(key), Some(item));
                prop_assert_eq!(mapper.key_of(item), Some(key.as_str()));
            }
        }
    }
}
