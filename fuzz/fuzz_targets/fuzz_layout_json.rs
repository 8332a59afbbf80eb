#![no_main]

use gridsync_layout::{ResponsiveLayouts, compare_semantically, content_hash};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(layouts) = serde_json::from_slice::<ResponsiveLayouts>(data) else {
        return;
    };

    // Validation must classify, never panic.
    let _ = layouts.validate();

    // Item order inside a breakpoint is not part of the identity.
    let mut reversed = ResponsiveLayouts::new();
    for (bp, items) in layouts.iter() {
        let mut items = items.to_vec();
        items.reverse();
        reversed.set_items(bp, items);
    }
    assert!(compare_semantically(&layouts, &reversed));
    assert_eq!(content_hash(&layouts), content_hash(&reversed));

    // The config payload never reaches the hash.
    let mut stripped = layouts.clone();
    for bp in layouts.breakpoints() {
        let ids: Vec<String> = layouts.items(bp).iter().map(|i| i.id.clone()).collect();
        for id in ids {
            if let Some(item) = stripped.item_mut(bp, &id) {
                item.config = serde_json::Value::Null;
            }
        }
    }
    assert_eq!(content_hash(&layouts), content_hash(&stripped));
});
