pub const EXAMPLE_DATASET: &str = r#"{"instance_id": "example_1", "selected_database": "shop", "category": "Query", "preprocess_sql": [], "error_sql": ["SELECT nme FROM customers"], "sol_sql": ["SELECT name FROM customers"], "pred_sqls": ["SELECT name FROM customers"], "clean_up_sql": [], "test_cases": ["def test_case(pred_sqls, sol_sqls, db_name, conn):\n    assert ex_base(pred_sqls, sol_sqls, db_name, conn) == 1\n"], "efficiency": false}
"#;

pub const GITIGNORE: &str = "*_run.log\n*_report.txt\n*_output_with_status.jsonl\n";
