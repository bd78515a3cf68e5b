//! Checks of the dialect block in `local.databases.gradle`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::info;

use super::plan::Backend;

pub const DATABASES_GRADLE: &str = "local-build-plugins/src/main/groovy/local.databases.gradle";
pub const MYSQL_DRIVER: &str = "com.mysql.cj.jdbc.Driver";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialectSettings {
    pub dialect: Option<String>,
    pub driver: Option<String>,
}

pub fn databases_gradle_path(workspace: &Path) -> PathBuf {
    workspace.join(DATABASES_GRADLE)
}

/// Body of the `<db> : [ ... ]` map, without the outer brackets.
pub fn extract_db_block<'a>(content: &'a str, db: &str) -> Option<&'a str> {
    let pattern = format!(r#"(?m)^\s*['"]?{}['"]?\s*:\s*\["#, regex::escape(db));
    let opener = Regex::new(&pattern).ok()?.find(content)?;
    let start = opener.end() - 1;

    let mut depth = 0usize;
    for (offset, ch) in content[start..].char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start + 1..start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Quoted value of `'key' : 'value'` inside a block.
pub fn extract_setting(block: &str, key: &str) -> Option<String> {
    let pattern = format!(
        r#"['"]?{}['"]?\s*:\s*(?:'([^']*)'|"([^"]*)")"#,
        regex::escape(key)
    );
    let captures = Regex::new(&pattern).ok()?.captures(block)?;
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|value| value.as_str().to_string())
}

pub fn read_settings(workspace: &Path, backend: Backend) -> Result<DialectSettings> {
    let path = databases_gradle_path(workspace);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("configuration file not found: {}", path.display()))?;
    let Some(block) = extract_db_block(&content, backend.as_str()) else {
        bail!(
            "unable to locate the `{}` block in {}",
            backend,
            path.display()
        );
    };
    Ok(DialectSettings {
        dialect: extract_setting(block, "db.dialect"),
        driver: extract_setting(block, "jdbc.driver"),
    })
}

/// TiDB runs must use a TiDB or MySQL dialect over the MySQL Connector/J driver.
pub fn verify(workspace: &Path, backend: Backend) -> Result<DialectSettings> {
    let settings = read_settings(workspace, backend)?;
    info!(
        backend = %backend,
        dialect = settings.dialect.as_deref().unwrap_or("<unknown>"),
        driver = settings.driver.as_deref().unwrap_or("<unknown>"),
        "dialect configuration"
    );

    if backend == Backend::Tidb {
        if let Some(dialect) = &settings.dialect {
            if !(dialect.contains("TiDBDialect") || dialect.contains("MySQLDialect")) {
                bail!("unexpected TiDB dialect `{dialect}`");
            }
        }
        if let Some(driver) = &settings.driver {
            if driver != MYSQL_DRIVER {
                bail!("unexpected TiDB driver `{driver}`");
            }
        }
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{
        Backend, DialectSettings, databases_gradle_path, extract_db_block, extract_setting,
        verify,
    };

    const GRADLE: &str = r#"ext {
    dbBundle = [
        mysql : [
            'db.dialect' : 'org.hibernate.dialect.MySQLDialect',
            'jdbc.driver': 'com.mysql.cj.jdbc.Driver',
            'jdbc.url'   : 'jdbc:mysql://' + dbHost + '/hibernate_orm_test'
        ],
        tidb : [
            'db.dialect' : "org.hibernate.community.dialect.TiDBDialect",
            'jdbc.driver': 'com.mysql.cj.jdbc.Driver',
            'connection.init_sql': [ 'SET @@tidb_enable_noop_functions=1' ].join(';')
        ],
        tidb_ci5 : [
            'db.dialect' : 'org.hibernate.dialect.H2Dialect'
        ]
    ]
}
"#;

    #[test]
    fn block_extraction_respects_nesting() {
        let block = extract_db_block(GRADLE, "tidb").expect("tidb block");
        assert!(block.contains("TiDBDialect"));
        assert!(block.contains("tidb_enable_noop_functions"));
        assert!(!block.contains("H2Dialect"));
        assert!(extract_db_block(GRADLE, "postgresql").is_none());
        assert!(extract_db_block("tidb : [ 'unterminated'", "tidb").is_none());
    }

    #[test]
    fn settings_accept_both_quote_styles() {
        let tidb = extract_db_block(GRADLE, "tidb").expect("tidb block");
        assert_eq!(
            extract_setting(tidb, "db.dialect").as_deref(),
            Some("org.hibernate.community.dialect.TiDBDialect")
        );
        let mysql = extract_db_block(GRADLE, "mysql").expect("mysql block");
        assert_eq!(
            extract_setting(mysql, "jdbc.driver").as_deref(),
            Some("com.mysql.cj.jdbc.Driver")
        );
        assert_eq!(extract_setting(mysql, "jdbc.user"), None);
    }

    #[test]
    fn verify_rejects_foreign_tidb_dialects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = databases_gradle_path(dir.path());
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");

        fs::write(&path, GRADLE).expect("write");
        let settings = verify(dir.path(), Backend::Tidb).expect("valid");
        assert_eq!(
            settings,
            DialectSettings {
                dialect: Some("org.hibernate.community.dialect.TiDBDialect".to_string()),
                driver: Some("com.mysql.cj.jdbc.Driver".to_string()),
            }
        );

        fs::write(
            &path,
            "tidb : [\n 'db.dialect' : 'org.hibernate.dialect.PostgreSQLDialect'\n]\n",
        )
        .expect("write");
        let err = verify(dir.path(), Backend::Tidb).expect_err("wrong dialect");
        assert!(err.to_string().contains("unexpected TiDB dialect"));

        fs::write(
            &path,
            "tidb : [\n 'db.dialect' : 'TiDBDialect',\n 'jdbc.driver' : 'org.mariadb.jdbc.Driver'\n]\n",
        )
        .expect("write");
        let err = verify(dir.path(), Backend::Tidb).expect_err("wrong driver");
        assert!(err.to_string().contains("unexpected TiDB driver"));
    }

    #[test]
    fn verify_requires_file_and_block() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = verify(dir.path(), Backend::Mysql).expect_err("missing file");
        assert!(err.to_string().contains("configuration file not found"));

        let path = databases_gradle_path(dir.path());
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, "tidb : [ ]\n").expect("write");
        let err = verify(dir.path(), Backend::Mysql).expect_err("missing block");
        assert!(err.to_string().contains("`mysql` block"));
    }
}
