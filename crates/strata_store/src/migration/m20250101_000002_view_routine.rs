//! Installs the in-engine view builder on MySQL.
//!
//! The routine enumerates a family's base tables (skipping more specific family
//! prefixes passed as a JSON array), projects the ordered column union with `NULL`
//! padding, and replaces the view. The shard count is left in
//! `@strata_shard_count` for the caller. Other backends have no routine and fall back
//! to the client-side builder.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{ConnectionTrait, DatabaseBackend};

use crate::db::VIEW_ROUTINE_NAME;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        if manager.get_database_backend() != DatabaseBackend::MySql {
            return Ok(());
        }
        let conn = manager.get_connection();
        conn.execute_unprepared(&format!("DROP PROCEDURE IF EXISTS `{VIEW_ROUTINE_NAME}`"))
            .await?;
        conn.execute_unprepared(&routine_sql()).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        if manager.get_database_backend() != DatabaseBackend::MySql {
            return Ok(());
        }
        manager
            .get_connection()
            .execute_unprepared(&format!("DROP PROCEDURE IF EXISTS `{VIEW_ROUTINE_NAME}`"))
            .await?;
        Ok(())
    }
}

fn routine_sql() -> String {
    format!(
        r#"CREATE PROCEDURE `{VIEW_ROUTINE_NAME}`(
    IN p_prefix VARCHAR(64),
    IN p_excludes JSON,
    IN p_view VARCHAR(64)
)
BEGIN
    DECLARE v_count INT DEFAULT 0;
    DECLARE v_body LONGTEXT;

    SET SESSION group_concat_max_len = 1073741824;
    SET @strata_shard_count = 0;

    DROP TEMPORARY TABLE IF EXISTS strata_tmp_shards;
    CREATE TEMPORARY TABLE strata_tmp_shards (
        table_name VARCHAR(64) NOT NULL PRIMARY KEY
    );
    INSERT INTO strata_tmp_shards (table_name)
    SELECT CAST(t.TABLE_NAME AS CHAR(64))
    FROM information_schema.TABLES t
    WHERE t.TABLE_SCHEMA = DATABASE()
      AND t.TABLE_TYPE = 'BASE TABLE'
      AND CHAR_LENGTH(t.TABLE_NAME) > CHAR_LENGTH(p_prefix)
      AND LEFT(CAST(t.TABLE_NAME AS BINARY), LENGTH(p_prefix)) = CAST(p_prefix AS BINARY)
      AND NOT EXISTS (
          SELECT 1
          FROM JSON_TABLE(p_excludes, '$[*]' COLUMNS (ex VARCHAR(64) PATH '$')) j
          WHERE LEFT(CAST(t.TABLE_NAME AS BINARY), LENGTH(j.ex)) = CAST(j.ex AS BINARY)
      );

    SELECT COUNT(*) INTO v_count FROM strata_tmp_shards;

    IF v_count > 0 THEN
        DROP TEMPORARY TABLE IF EXISTS strata_tmp_columns;
        CREATE TEMPORARY TABLE strata_tmp_columns (
            column_name VARCHAR(64) NOT NULL PRIMARY KEY,
            first_pos INT NOT NULL
        );
        INSERT INTO strata_tmp_columns (column_name, first_pos)
        SELECT CAST(c.COLUMN_NAME AS CHAR(64)), MIN(c.ORDINAL_POSITION)
        FROM information_schema.COLUMNS c
        JOIN strata_tmp_shards s
          ON CAST(c.TABLE_NAME AS BINARY) = CAST(s.table_name AS BINARY)
        WHERE c.TABLE_SCHEMA = DATABASE()
        GROUP BY CAST(c.COLUMN_NAME AS CHAR(64));

        SELECT GROUP_CONCAT(frags.frag ORDER BY frags.tbl SEPARATOR ' UNION ALL ')
        INTO v_body
        FROM (
            SELECT CAST(s.table_name AS BINARY) AS tbl,
                   CONCAT(
                       'SELECT ',
                       GROUP_CONCAT(
                           IF(c.COLUMN_NAME IS NULL,
                              CONCAT('NULL AS `', v.column_name, '`'),
                              CONCAT('`', v.column_name, '`'))
                           ORDER BY v.first_pos, CAST(v.column_name AS BINARY)
                           SEPARATOR ', '),
                       ' FROM `', s.table_name, '`') AS frag
            FROM strata_tmp_shards s
            CROSS JOIN strata_tmp_columns v
            LEFT JOIN information_schema.COLUMNS c
                   ON c.TABLE_SCHEMA = DATABASE()
                  AND CAST(c.TABLE_NAME AS BINARY) = CAST(s.table_name AS BINARY)
                  AND CAST(c.COLUMN_NAME AS BINARY) = CAST(v.column_name AS BINARY)
            GROUP BY s.table_name
        ) AS frags;

        SET @strata_view_ddl = CONCAT('CREATE OR REPLACE VIEW `', p_view, '` AS ', v_body);
        PREPARE strata_view_stmt FROM @strata_view_ddl;
        EXECUTE strata_view_stmt;
        DEALLOCATE PREPARE strata_view_stmt;
        DROP TEMPORARY TABLE IF EXISTS strata_tmp_columns;
    END IF;

    DROP TEMPORARY TABLE IF EXISTS strata_tmp_shards;
    SET @strata_shard_count = v_count;
END"#
    )
}
