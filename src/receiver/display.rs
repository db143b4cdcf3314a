use crate::receiver::FetchResult;
use log::{error, info};

pub fn display_result(result: &FetchResult) {
    match serde_json::to_string_pretty(result) {
        Ok(json) => info!("{}", json),
        Err(e) => error!("Error converting to JSON: {}", e),
    }
}
