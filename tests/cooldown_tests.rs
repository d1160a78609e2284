//! Cooldown storage end to end.

mod common;

use std::time::Duration;

use asyncsql_core::cache::cooldown::NO_COOLDOWN;
use asyncsql_core::cache::CooldownStorage;
use asyncsql_core::config::AsyncSqlConfig;
use common::{mock_connection, started_scheduler};

#[test]
fn test_format_time_left_fills_placeholders() {
    assert_eq!(
        CooldownStorage::format_time_left("{hours}h{minutes}m{seconds}s", 3_725_000),
        "1h2m5s"
    );
    assert_eq!(
        CooldownStorage::format_time_left("{weeks}w {days}d {milliseconds}ms", 8 * 86_400_000 + 42),
        "1w 1d 42ms"
    );
}

#[test]
fn test_create_issues_table_definition() {
    let scheduler = started_scheduler();
    let (connection, mock) = mock_connection(&scheduler, &AsyncSqlConfig::for_test());

    let cooldowns = CooldownStorage::create(None, &connection, "cooldowns").unwrap();
    assert_eq!(cooldowns.storage().key_column(), "UUID");
    assert_eq!(cooldowns.storage().value_column(), "Cooldown");
    assert!(mock.statements().contains(
        &"CREATE TABLE IF NOT EXISTS `cooldowns` (`UUID` varchar(36), `Cooldown` BIGINT)".to_string()
    ));
    scheduler.stop();
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use crate::common::sqlite_connection;

    #[test]
    fn test_unknown_id_has_no_cooldown() {
        let scheduler = started_scheduler();
        let connection = sqlite_connection(&scheduler);
        let cooldowns = CooldownStorage::create(None, &connection, "cooldowns").unwrap();

        assert_eq!(cooldowns.get_cooldown("u-1").unwrap(), NO_COOLDOWN);
        assert!(cooldowns.is_expired("u-1").unwrap());
        assert!(cooldowns.get_time_left("u-1").unwrap() < 0);

        connection.disconnect().wait().unwrap();
        scheduler.stop();
    }

    #[test]
    fn test_set_cooldown_blocks_until_it_passes() {
        let scheduler = started_scheduler();
        let connection = sqlite_connection(&scheduler);
        let cooldowns = CooldownStorage::create(None, &connection, "cooldowns").unwrap();

        cooldowns.set_cooldown("u-1", Duration::from_secs(10)).unwrap();
        assert!(!cooldowns.is_expired("u-1").unwrap());
        let left = cooldowns.get_time_left("u-1").unwrap();
        assert!(left > 9_000 && left <= 10_000, "time left was {left}");

        cooldowns.set_cooldown("u-2", Duration::from_millis(50)).unwrap();
        std::thread::sleep(Duration::from_millis(80));
        assert!(cooldowns.is_expired("u-2").unwrap());

        connection.disconnect().wait().unwrap();
        scheduler.stop();
    }

    #[test]
    fn test_cooldowns_survive_a_fresh_cache() {
        let scheduler = started_scheduler();
        let connection = sqlite_connection(&scheduler);
        let writer = CooldownStorage::create(None, &connection, "cooldowns").unwrap();
        writer.set_cooldown("u-1", Duration::from_secs(60)).unwrap();
        let stored = writer.get_cooldown("u-1").unwrap();

        let reader = CooldownStorage::create(None, &connection, "cooldowns").unwrap();
        assert_eq!(reader.get_cooldown("u-1").unwrap(), stored);

        connection.disconnect().wait().unwrap();
        scheduler.stop();
    }

    #[test]
    fn test_remove_cooldown_resets_to_none() {
        let scheduler = started_scheduler();
        let connection = sqlite_connection(&scheduler);
        let cooldowns = CooldownStorage::create(None, &connection, "cooldowns").unwrap();

        cooldowns.set_cooldown("u-1", Duration::from_secs(60)).unwrap();
        cooldowns.remove_cooldown("u-1");
        assert_eq!(cooldowns.get_cooldown("u-1").unwrap(), NO_COOLDOWN);
        assert!(cooldowns.is_expired("u-1").unwrap());

        connection.disconnect().wait().unwrap();
        scheduler.stop();
    }
}
