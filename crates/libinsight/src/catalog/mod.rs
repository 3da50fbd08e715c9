//! Hand-authored description of the library statistics dataset.
//!
//! The catalog is the only schema knowledge handed to the generation oracle. It is
//! built once per process and never mutated.

use std::fmt::Write as _;
use std::sync::OnceLock;

use serde::Serialize;

pub const LIBRARY_CODE_COLUMN: &str = "도서관코드";
pub const PROVINCE_COLUMN: &str = "시도";
pub const DISTRICT_COLUMN: &str = "시군구";
pub const POPULATION_TABLE: &str = "pop";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
}

impl ColumnType {
    #[must_use]
    pub const fn sql_name(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub table: &'static str,
    pub columns: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: &'static str,
    pub declared_type: ColumnType,
    pub primary_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<ForeignKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub name: &'static str,
    pub description: &'static str,
    pub source_file: &'static str,
    pub columns: Vec<Column>,
}

impl Table {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    #[must_use]
    pub fn primary_key(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .filter(|column| column.primary_key)
            .map(|column| column.name)
            .collect()
    }

    #[must_use]
    pub fn has_composite_key(&self) -> bool {
        self.primary_key().len() > 1
    }

    /// Constraint-free DDL; keys are logical and documented in the prompt text only.
    #[must_use]
    pub fn create_table_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|column| {
                format!(
                    "{} {}",
                    quote_identifier(column.name),
                    column.declared_type.sql_name()
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({columns});",
            quote_identifier(self.name)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaCatalog {
    tables: Vec<Table>,
}

impl SchemaCatalog {
    #[must_use]
    pub fn library() -> &'static SchemaCatalog {
        static CATALOG: OnceLock<SchemaCatalog> = OnceLock::new();
        CATALOG.get_or_init(build_library_catalog)
    }

    #[must_use]
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|table| table.name == name)
    }

    #[must_use]
    pub fn table_names(&self) -> Vec<&'static str> {
        self.tables.iter().map(|table| table.name).collect()
    }

    /// Join predicate between two catalog tables, following the dataset's key
    /// conventions: the regional table joins on (시도, 시군구), everything else on 도서관코드.
    #[must_use]
    pub fn join_condition(&self, left: &str, right: &str) -> Option<String> {
        let left_table = self.table(left)?;
        let right_table = self.table(right)?;
        if left == right {
            return None;
        }

        if left == POPULATION_TABLE || right == POPULATION_TABLE {
            let regional_columns = [PROVINCE_COLUMN, DISTRICT_COLUMN];
            let both_regional = regional_columns.iter().all(|column| {
                left_table.has_column(column) && right_table.has_column(column)
            });
            return both_regional.then(|| {
                regional_columns
                    .iter()
                    .map(|column| format!("{left}.{column} = {right}.{column}"))
                    .collect::<Vec<_>>()
                    .join(" AND ")
            });
        }

        (left_table.has_column(LIBRARY_CODE_COLUMN) && right_table.has_column(LIBRARY_CODE_COLUMN))
            .then(|| format!("{left}.{LIBRARY_CODE_COLUMN} = {right}.{LIBRARY_CODE_COLUMN}"))
    }

    /// Text block embedded verbatim in the query generation prompt.
    #[must_use]
    pub fn render_prompt_text(&self) -> String {
        let mut rendered = String::from("[데이터베이스 스키마]\n");
        for (index, table) in self.tables.iter().enumerate() {
            let _ = write!(
                rendered,
                "\n{}) {} ({})\n",
                index + 1,
                table.name,
                table.description
            );
            let composite = table.has_composite_key();
            for column in &table.columns {
                let mut notes = vec![column.declared_type.sql_name().to_string()];
                if column.primary_key {
                    notes.push(if composite {
                        "PK → 복합키의 일부".to_string()
                    } else {
                        "PK".to_string()
                    });
                }
                if let Some(reference) = &column.references {
                    notes.push(format!("FK → {}", render_reference(reference)));
                }
                let _ = writeln!(rendered, "  - {} ({})", column.name, notes.join(", "));
            }
        }
        rendered
    }

    #[must_use]
    pub fn create_schema_sql(&self) -> String {
        self.tables
            .iter()
            .map(Table::create_table_sql)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn render_reference(reference: &ForeignKey) -> String {
    match reference.columns {
        [single] => format!("{}.{single}", reference.table),
        columns => format!("{}.({})", reference.table, columns.join(", ")),
    }
}

#[must_use]
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

const LIBRARY_KEY: ForeignKey = ForeignKey {
    table: "base_info",
    columns: &[LIBRARY_CODE_COLUMN],
};

const REGION_KEY: ForeignKey = ForeignKey {
    table: POPULATION_TABLE,
    columns: &[PROVINCE_COLUMN, DISTRICT_COLUMN],
};

fn column(name: &'static str, declared_type: ColumnType) -> Column {
    Column {
        name,
        declared_type,
        primary_key: false,
        references: None,
    }
}

fn key_column(name: &'static str, declared_type: ColumnType) -> Column {
    Column {
        primary_key: true,
        ..column(name, declared_type)
    }
}

fn library_key_column() -> Column {
    Column {
        references: Some(LIBRARY_KEY),
        ..key_column(LIBRARY_CODE_COLUMN, ColumnType::Integer)
    }
}

fn region_column(name: &'static str) -> Column {
    Column {
        references: Some(REGION_KEY),
        ..column(name, ColumnType::Text)
    }
}

fn build_library_catalog() -> SchemaCatalog {
    use ColumnType::{Float, Integer, Text};

    let base_info = Table {
        name: "base_info",
        description: "도서관 기본 정보",
        source_file: "T1_도서관기본정보.csv",
        columns: vec![
            key_column(LIBRARY_CODE_COLUMN, Integer),
            column("도서관명", Text),
            column("구분", Text),
            region_column(PROVINCE_COLUMN),
            region_column(DISTRICT_COLUMN),
        ],
    };

    let holding = Table {
        name: "holding",
        description: "장서 현황",
        source_file: "T2_장서정보.csv",
        columns: vec![
            library_key_column(),
            column("총장서", Integer),
            column("국외서", Integer),
        ],
    };

    let fac = Table {
        name: "fac",
        description: "시설 현황",
        source_file: "T3_시설현황.csv",
        columns: vec![
            library_key_column(),
            column("도서관_부지면적", Float),
            column("도서관_건물_연면적", Float),
            column("도서관_서비스_제공면적", Float),
            column("총좌석수", Integer),
            column("어린이_열람석", Integer),
            column("노인및장애인_열람석", Integer),
        ],
    };

    let user = Table {
        name: "user",
        description: "이용자 현황",
        source_file: "T4_이용자정보.csv",
        columns: vec![
            library_key_column(),
            column("회원_어린이", Integer),
            column("회원_청소년", Integer),
            column("회원_성인", Integer),
            column("방문자수", Integer),
        ],
    };

    let service = Table {
        name: "service",
        description: "서비스 현황",
        source_file: "T5_지식정보취약계층서비스.csv",
        columns: vec![
            library_key_column(),
            column("취약계층서비스이용수_합계", Integer),
            column("취약계층서비스이용수_장애인", Integer),
            column("취약계층서비스이용수_노인", Integer),
            column("취약계층서비스이용수_다문화", Integer),
            column("취약계층관련예산_합계", Integer),
            column("취약계층관련예산_장애인", Integer),
            column("취약계층관련예산_노인", Integer),
            column("취약계층관련예산_다문화", Integer),
            column("취약계층공간_장애인", Text),
            column("취약계층공간_노인", Text),
            column("취약계층공간_다문화", Text),
            column("어린이실", Text),
            column("어린이서비스_이용수", Integer),
            column("어린이자료_인쇄수", Integer),
        ],
    };

    let pop = Table {
        name: POPULATION_TABLE,
        description: "지역 인구 마스터",
        source_file: "T6_지역인구.csv",
        columns: vec![
            key_column(PROVINCE_COLUMN, Text),
            key_column(DISTRICT_COLUMN, Text),
            column("총인구", Integer),
            column("어린이인구", Integer),
            column("노인인구", Integer),
            column("장애인인구", Integer),
            column("다문화인구", Integer),
        ],
    };

    SchemaCatalog {
        tables: vec![base_info, holding, fac, user, service, pop],
    }
}
