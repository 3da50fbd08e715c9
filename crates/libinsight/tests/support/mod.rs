#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use libinsight::catalog::SchemaCatalog;
use libinsight::oracle::{CompletionOracle, CompletionRequest, OracleError};
use libinsight::store::{initialize_schema, open_store_connection, replace_table_rows};
use rusqlite::types::Value as SqlValue;

pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{nanos}"))
}

/// Store with three libraries, two of them in Seoul. Every other table stays empty.
pub fn seeded_store(prefix: &str) -> PathBuf {
    let db_path = unique_temp_dir(prefix).join("CatDewey.db");
    let connection = open_store_connection(&db_path).expect("store should open");
    let catalog = SchemaCatalog::library();
    initialize_schema(&connection, catalog).expect("schema should initialize");

    let base_info = catalog.table("base_info").expect("base_info table");
    let rows = [
        (1_i64, "정독도서관", "공공", "서울특별시", "종로구"),
        (2, "남산도서관", "공공", "서울특별시", "용산구"),
        (3, "해운대도서관", "공공", "부산광역시", "해운대구"),
    ]
    .into_iter()
    .map(|(code, name, kind, province, district)| {
        vec![
            SqlValue::Integer(code),
            SqlValue::Text(name.to_string()),
            SqlValue::Text(kind.to_string()),
            SqlValue::Text(province.to_string()),
            SqlValue::Text(district.to_string()),
        ]
    })
    .collect::<Vec<_>>();
    replace_table_rows(&connection, base_info, &rows).expect("rows should insert");
    db_path
}

pub fn remove_store(db_path: &Path) {
    if let Some(parent) = db_path.parent() {
        let _ = std::fs::remove_dir_all(parent);
    }
}

const DEFAULT_VIZ_REPLY: &str = r#"```rhai
let counts = [];
for name in df["도서관명"] { counts.push(1); }
plt.bar(df["도서관명"], counts);
plt.title("지역별 도서관");
```"#;

/// Oracle that answers by request kind and counts every call.
pub struct ScriptedOracle {
    sql_reply: Result<String, OracleError>,
    viz_reply: Result<String, OracleError>,
    report_reply: Result<String, OracleError>,
    calls: AtomicUsize,
    user_prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn answering(sql: &str) -> Self {
        let reply = serde_json::json!({ "sql": sql, "explanation": "서울 도서관 목록입니다." });
        Self {
            sql_reply: Ok(reply.to_string()),
            viz_reply: Ok(DEFAULT_VIZ_REPLY.to_string()),
            report_reply: Ok("서울에는 두 개의 도서관이 있습니다.".to_string()),
            calls: AtomicUsize::new(0),
            user_prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        let down = || Err(OracleError::Unavailable("connection refused".to_string()));
        Self {
            sql_reply: down(),
            viz_reply: down(),
            report_reply: down(),
            calls: AtomicUsize::new(0),
            user_prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_sql_reply(mut self, reply: Result<String, OracleError>) -> Self {
        self.sql_reply = reply;
        self
    }

    pub fn with_viz_reply(mut self, reply: Result<String, OracleError>) -> Self {
        self.viz_reply = reply;
        self
    }

    pub fn with_report_reply(mut self, reply: Result<String, OracleError>) -> Self {
        self.report_reply = reply;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn user_prompts(&self) -> Vec<String> {
        self.user_prompts
            .lock()
            .expect("prompt log should not be poisoned")
            .clone()
    }
}

impl CompletionOracle for ScriptedOracle {
    fn complete(&self, request: &CompletionRequest) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let user = request.user_prompt().unwrap_or_default().to_string();
        self.user_prompts
            .lock()
            .expect("prompt log should not be poisoned")
            .push(user.clone());

        if user == "시각화 코드를 작성해줘." {
            self.viz_reply.clone()
        } else if user.starts_with("질문:") {
            self.report_reply.clone()
        } else {
            self.sql_reply.clone()
        }
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}
