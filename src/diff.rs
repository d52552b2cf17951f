use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::types::*;

pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    let join = |key: &str| {
        if path_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{path_prefix}.{key}")
        }
    };
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = join(key);
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => {
                        if curr_val.is_object() {
                            diff_json(&Value::Object(Map::new()), curr_val, &path, changes);
                        } else {
                            changes.push((path, Value::Null, curr_val.clone()));
                        }
                    }
                }
            }
        }
        (Value::Array(prev_arr), Value::Array(curr_arr)) if prev_arr.len() == curr_arr.len() => {
            for (idx, (prev_val, curr_val)) in prev_arr.iter().zip(curr_arr).enumerate() {
                diff_json(prev_val, curr_val, &join(&idx.to_string()), changes);
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

/// Per-device changes between two discovery snapshots.
///
/// Devices absent from `previous` produce no events; their first report is
/// carried by `Event::DeviceUpdated`.
pub(crate) fn status_events(previous: &[DeviceRecord], current: &[DeviceRecord]) -> Vec<Event> {
    let by_id: HashMap<&str, &DeviceRecord> =
        previous.iter().map(|d| (d.id.as_str(), d)).collect();

    let mut events = Vec::new();
    for device in current {
        let Some(prev) = by_id.get(device.id.as_str()) else {
            continue;
        };
        if prev.online != device.online {
            events.push(Event::OnlineChanged {
                device_id: device.id.clone(),
                online: device.online,
            });
        }
        for dp in &device.status {
            let old = prev.data_point(&dp.code).map(|p| &p.value);
            if old != Some(&dp.value) {
                events.push(Event::DataPointChanged {
                    device_id: device.id.clone(),
                    code: dp.code.clone(),
                    old: old.cloned(),
                    new: dp.value.clone(),
                });
            }
        }
    }
    events
}
