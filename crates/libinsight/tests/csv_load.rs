mod support;

use libinsight::catalog::SchemaCatalog;
use libinsight::guard::QueryGuard;
use libinsight::store::ExecutionBridge;
use libinsight::store::load::load_csv_directory;
use serde_json::json;
use support::unique_temp_dir;

fn write_sources(dir: &std::path::Path) {
    std::fs::create_dir_all(dir).expect("source dir should be creatable");
    let files = [
        (
            "T1_도서관기본정보.csv",
            "\u{feff}도서관코드,도서관명,구분,시도,시군구,홈페이지\n\
             1,정독도서관,공공,서울특별시,종로구,http://example.org\n\
             2,남산도서관,공공,서울특별시,용산구,\n",
        ),
        ("T2_장서정보.csv", "도서관코드,총장서\n1,\"520,000\"\n2,480000\n"),
        ("T3_시설현황.csv", "도서관코드,도서관_부지면적,총좌석수\n1,1234.5,300\n"),
        ("T4_이용자정보.csv", "도서관코드,방문자수\n1,미집계\n"),
        ("T5_지식정보취약계층서비스.csv", "도서관코드,취약계층공간_장애인\n1,있음\n"),
        ("T6_지역인구.csv", "시도,시군구,총인구\n서울특별시,종로구,141000\n"),
    ];
    for (name, contents) in files {
        std::fs::write(dir.join(name), contents).expect("source csv should be writable");
    }
}

#[test]
fn loads_every_table_and_reports_column_drift() {
    let temp = unique_temp_dir("libinsight-load");
    let source_dir = temp.join("csv");
    let db_path = temp.join("data").join("CatDewey.db");
    write_sources(&source_dir);

    let report = load_csv_directory(&source_dir, &db_path, SchemaCatalog::library())
        .expect("load should succeed");

    assert_eq!(report.tables.len(), 6);
    assert_eq!(report.total_rows(), 8);
    let base_info = &report.tables[0];
    assert_eq!(base_info.table, "base_info");
    assert_eq!(base_info.rows_written, 2);
    assert_eq!(base_info.ignored_columns, ["홈페이지".to_string()]);
    assert!(base_info.missing_columns.is_empty());
    let holding = &report.tables[1];
    assert_eq!(holding.missing_columns, ["국외서".to_string()]);

    let sql = "SELECT b.도서관명, h.총장서, u.방문자수 FROM base_info b \
               JOIN holding h ON b.도서관코드 = h.도서관코드 \
               LEFT JOIN user u ON b.도서관코드 = u.도서관코드 ORDER BY h.총장서 DESC";
    let validated = QueryGuard.validate(sql).expect("join should pass the guard");
    let table = ExecutionBridge::new(&db_path, 100)
        .execute(&validated)
        .expect("query should run");
    assert_eq!(
        table.rows(),
        [
            vec![json!("정독도서관"), json!(520_000), json!("미집계")],
            vec![json!("남산도서관"), json!(480_000), json!(null)],
        ]
    );

    let _ = std::fs::remove_dir_all(&temp);
}

#[test]
fn reloading_replaces_previous_rows() {
    let temp = unique_temp_dir("libinsight-reload");
    let source_dir = temp.join("csv");
    let db_path = temp.join("CatDewey.db");
    write_sources(&source_dir);

    load_csv_directory(&source_dir, &db_path, SchemaCatalog::library())
        .expect("first load should succeed");
    let report = load_csv_directory(&source_dir, &db_path, SchemaCatalog::library())
        .expect("second load should succeed");
    assert_eq!(report.tables[0].rows_written, 2);

    let validated = QueryGuard
        .validate("SELECT COUNT(*) AS n FROM base_info")
        .expect("count should pass the guard");
    let table = ExecutionBridge::new(&db_path, 10)
        .execute(&validated)
        .expect("count should run");
    assert_eq!(table.rows(), [vec![json!(2)]]);

    let _ = std::fs::remove_dir_all(&temp);
}

#[test]
fn missing_sources_abort_before_writing() {
    let temp = unique_temp_dir("libinsight-load-missing");
    let source_dir = temp.join("csv");
    write_sources(&source_dir);
    std::fs::remove_file(source_dir.join("T6_지역인구.csv")).expect("file should be removable");
    let db_path = temp.join("CatDewey.db");

    let error = load_csv_directory(&source_dir, &db_path, SchemaCatalog::library())
        .expect_err("missing file should fail");

    assert!(format!("{error:#}").contains("T6_지역인구.csv"));
    assert!(!db_path.exists());
    let _ = std::fs::remove_dir_all(&temp);
}

#[test]
fn cp949_sources_load_with_readable_korean() {
    let temp = unique_temp_dir("libinsight-load-cp949");
    let source_dir = temp.join("csv");
    let db_path = temp.join("CatDewey.db");
    write_sources(&source_dir);
    let (encoded, _, _) = encoding_rs::EUC_KR.encode(
        "도서관코드,도서관명,구분,시도,시군구\n\
         1,정독도서관,공공,서울특별시,종로구\n\
         2,해운대도서관,공공,부산광역시,해운대구\n",
    );
    std::fs::write(source_dir.join("T1_도서관기본정보.csv"), &encoded)
        .expect("cp949 source should be writable");

    let report = load_csv_directory(&source_dir, &db_path, SchemaCatalog::library())
        .expect("cp949 load should succeed");
    assert_eq!(report.tables[0].rows_written, 2);
    assert!(report.tables[0].missing_columns.is_empty());

    let validated = QueryGuard
        .validate("SELECT 도서관명, 시도 FROM base_info ORDER BY 도서관코드")
        .expect("select should pass the guard");
    let table = ExecutionBridge::new(&db_path, 10)
        .execute(&validated)
        .expect("select should run");
    assert_eq!(
        table.rows(),
        [
            vec![json!("정독도서관"), json!("서울특별시")],
            vec![json!("해운대도서관"), json!("부산광역시")],
        ]
    );

    let _ = std::fs::remove_dir_all(&temp);
}

#[test]
fn source_without_any_catalog_header_is_refused() {
    let temp = unique_temp_dir("libinsight-load-headers");
    let source_dir = temp.join("csv");
    let db_path = temp.join("CatDewey.db");
    write_sources(&source_dir);
    std::fs::write(
        source_dir.join("T3_시설현황.csv"),
        "library_id,site_area,seats\n1,1234.5,300\n",
    )
    .expect("source csv should be writable");

    let error = load_csv_directory(&source_dir, &db_path, SchemaCatalog::library())
        .expect_err("a table with no recognised columns should fail");

    let message = format!("{error:#}");
    assert!(message.contains("matches none of its catalog columns"));
    assert!(message.contains("T3_시설현황.csv"));
    let _ = std::fs::remove_dir_all(&temp);
}
