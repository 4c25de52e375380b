//! Versioned configuration migration, keyed by `configuration_version`,
//! mirroring the source's bootstrap config migrations but expressed as
//! ordered mutators over a `toml::Value` table instead of a struct-tagged
//! decoder chain.

use toml::Value;

use crate::error::ServiceError;

/// A single migration step. `from` is the `configuration_version` it
/// applies to; `apply` rewrites the table in place and the manager bumps
/// `configuration_version` to `from + 1` afterwards.
pub struct Migration {
    pub from: i64,
    pub apply: fn(&mut Value) -> Result<(), String>,
}

/// Walk `migrations` in ascending `from` order, applying every step whose
/// `from` is >= the config's current `configuration_version`, until none
/// apply. `service` is only used to label errors.
pub fn migrate(
    service: &'static str,
    mut config: Value,
    migrations: &[Migration],
) -> Result<Value, ServiceError> {
    let table = config
        .as_table()
        .ok_or_else(|| ServiceError::Config { service, message: "config root is not a table".into() })?;
    let mut version = table
        .get("configuration_version")
        .and_then(Value::as_integer)
        .unwrap_or(0);

    let mut ordered: Vec<&Migration> = migrations.iter().collect();
    ordered.sort_by_key(|m| m.from);

    for m in ordered {
        if m.from < version {
            continue;
        }
        (m.apply)(&mut config).map_err(|message| ServiceError::Config { service, message })?;
        version = m.from + 1;
        let table = config
            .as_table_mut()
            .ok_or_else(|| ServiceError::Config { service, message: "config root is not a table".into() })?;
        table.insert("configuration_version".into(), Value::Integer(version));
    }
    Ok(config)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn migrations_apply_in_order_and_bump_version() {
        let config: Value = toml::from_str("name = \"x\"").unwrap();
        let migrations = [
            Migration {
                from: 0,
                apply: |v| {
                    v.as_table_mut().unwrap().insert("added_at_v1".into(), Value::Boolean(true));
                    Ok(())
                },
            },
            Migration {
                from: 1,
                apply: |v| {
                    v.as_table_mut().unwrap().insert("added_at_v2".into(), Value::Boolean(true));
                    Ok(())
                },
            },
        ];
        let migrated = migrate("svc", config, &migrations).unwrap();
        let table = migrated.as_table().unwrap();
        assert_eq!(table.get("configuration_version").unwrap().as_integer(), Some(2));
        assert!(table.contains_key("added_at_v1"));
        assert!(table.contains_key("added_at_v2"));
    }

    #[test]
    fn already_current_config_skips_migrations() {
        let config: Value = toml::from_str("configuration_version = 2").unwrap();
        let migrations = [Migration {
            from: 0,
            apply: |_| panic!("should not run"),
        }];
        let migrated = migrate("svc", config, &migrations).unwrap();
        assert_eq!(migrated.as_table().unwrap().get("configuration_version").unwrap().as_integer(), Some(2));
    }
}
