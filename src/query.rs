use serde_json::Value;

use crate::types::ScheduleId;

pub fn ts_range_query(start_ms: i64, end_ms: i64) -> Value {
    serde_json::json!({
        "range": {
            "timestamp_ms": { "gte": start_ms, "lt": end_ms }
        }
    })
}

pub fn pending_schedules_body(start_ms: i64, end_ms: i64) -> Value {
    serde_json::json!({
        "size": 10000,
        "_source": ["schedule_id"],
        "query": ts_range_query(start_ms, end_ms)
    })
}

pub fn schedule_rows_body(schedule_id: ScheduleId, start_ms: i64, end_ms: i64) -> Value {
    serde_json::json!({
        "size": 10000,
        "sort": [{ "timestamp_ms": "asc" }],
        "query": {
            "bool": {
                "filter": [
                    { "term": { "schedule_id": schedule_id } },
                    ts_range_query(start_ms, end_ms)
                ]
            }
        }
    })
}

pub fn purge_body(start_ms: i64, end_ms: i64) -> Value {
    serde_json::json!({
        "query": ts_range_query(start_ms, end_ms)
    })
}
