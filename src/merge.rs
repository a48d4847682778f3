use crate::models::{FlexsaveSpendData, PersistedConfiguration};
use chrono::{DateTime, Utc};

pub fn merge_configuration(
    existing: Option<PersistedConfiguration>,
    computed: FlexsaveSpendData,
    time_enabled: Option<DateTime<Utc>>,
) -> PersistedConfiguration {
    match existing {
        Some(mut config) => {
            config.savings_history.extend(computed.spend);
            config.savings_summary = Some(computed.savings_summary);
            if config.enabled && config.time_enabled.is_none() {
                config.time_enabled = time_enabled;
            }
            config
        }
        None => PersistedConfiguration {
            enabled: true,
            time_enabled,
            savings_history: computed.spend,
            savings_summary: Some(computed.savings_summary),
        },
    }
}
