//! Small builder helpers for `nh_common::SendOptions` (spec.md §4.10 "Options
//! carry..."), used by `Hub`'s `quick_send`/`send_text`/`send_alert` thin
//! wrappers so callers don't need to know every field.

use chrono::{DateTime, Utc};
use nh_common::SendOptions;

pub fn sync_options() -> SendOptions {
    SendOptions::default()
}

pub fn async_options() -> SendOptions {
    SendOptions {
        r#async: true,
        ..Default::default()
    }
}

pub fn scheduled_options(at: DateTime<Utc>) -> SendOptions {
    SendOptions {
        r#async: true,
        scheduled_at: Some(at),
        ..Default::default()
    }
}

pub fn with_max_retries(mut options: SendOptions, max_retries: u32) -> SendOptions {
    options.max_retries = Some(max_retries);
    options
}
