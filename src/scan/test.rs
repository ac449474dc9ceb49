use super::*;
use crate::{
    filter::{ComparisonOp, Literal, Predicate},
    schema::{ColumnKind, ColumnSchema, ColumnType, Schema},
    testutil::{page_body, Reply, ScriptedTransport},
};
use serde_json::json;

fn column(name: &str, column_type: ColumnType, external_type: &str) -> ColumnSchema {
    ColumnSchema {
        name: name.to_string(),
        path: name.to_string(),
        column_type,
        external_type: external_type.to_string(),
        kind: ColumnKind::Field,
        full_text: false,
        exact_match_companion: false,
    }
}

fn test_schema() -> Schema {
    let mut schema = Schema {
        columns: vec![
            ColumnSchema {
                name: "_id".to_string(),
                path: "_id".to_string(),
                column_type: ColumnType::Varchar,
                external_type: String::new(),
                kind: ColumnKind::Id,
                full_text: false,
                exact_match_companion: false,
            },
            column("tag", ColumnType::Varchar, "keyword"),
            column("count", ColumnType::BigInt, "long"),
            column(
                "tags",
                ColumnType::List(Box::new(ColumnType::Varchar)),
                "keyword",
            ),
            column("location", ColumnType::Varchar, "geo_point"),
            column(
                "employee",
                ColumnType::Struct(vec![
                    ("name".to_string(), ColumnType::Varchar),
                    ("age".to_string(), ColumnType::Int),
                ]),
                "object",
            ),
            column("at", ColumnType::Timestamp, "date"),
            ColumnSchema {
                name: "_unmapped_".to_string(),
                path: "_unmapped_".to_string(),
                column_type: ColumnType::Varchar,
                external_type: String::new(),
                kind: ColumnKind::Residual,
                full_text: false,
                exact_match_companion: false,
            },
        ],
        ..Default::default()
    };
    for path in [
        "tag",
        "count",
        "tags",
        "location",
        "employee",
        "employee.name",
        "employee.age",
        "at",
    ] {
        schema.mapped_paths.insert(path.to_string());
    }
    schema
}

fn options(page_size: u32, factor: u32) -> crate::options::ConnectionOptions {
    crate::options::ConnectionOptions {
        host: "localhost".to_string(),
        max_retries: 0,
        retry_interval_ms: 0,
        page_size,
        page_size_threshold_factor: factor,
        ..Default::default()
    }
}

fn projected(names: &[&str]) -> Projection {
    Projection {
        output: names.iter().map(|n| n.to_string()).collect(),
        filter_only: Vec::new(),
    }
}

fn compile(
    projection: &Projection,
    limit: Option<u64>,
    offset: u64,
    opts: &crate::options::ConnectionOptions,
) -> ScanRequest {
    ScanRequest::compile(
        &test_schema(),
        "logs",
        None,
        &FilterSet::new(),
        projection,
        limit,
        offset,
        opts,
    )
    .unwrap()
}

fn open_scan(replies: Vec<Reply>, request: ScanRequest) -> (Scan<ScriptedTransport>, ScriptedTransport) {
    let transport = ScriptedTransport::new(replies);
    let client = crate::client::RetryClient::new(transport.clone(), &options(1000, 5));
    (Scan::open(client, request), transport)
}

fn drain(scan: &mut Scan<ScriptedTransport>) -> Vec<Row> {
    let mut rows = Vec::new();
    while let Some(row) = scan.next_row().unwrap() {
        rows.push(row);
    }
    rows
}

mod request_compilation {
    use super::*;

    #[test]
    fn no_query_and_no_filters_is_match_all() {
        let request = compile(&projected(&["_id", "tag"]), None, 0, &options(1000, 5));
        assert_eq!(request.body["query"], json!({ "match_all": {} }));
    }

    #[test]
    fn base_query_and_filters_combine_under_must() {
        let mut filters = FilterSet::new();
        filters.insert(
            "count".to_string(),
            Predicate::Comparison {
                op: ComparisonOp::Gt,
                constant: Literal::Int(10),
            },
        );
        let base = json!({ "term": { "tag": "x" } });
        let request = ScanRequest::compile(
            &test_schema(),
            "logs",
            Some(&base),
            &filters,
            &projected(&["_id", "tag"]),
            None,
            0,
            &options(1000, 5),
        )
        .unwrap();
        assert_eq!(
            request.body["query"],
            json!({ "bool": { "must": [
                { "term": { "tag": "x" } },
                { "range": { "count": { "gt": 10 } } }
            ]}})
        );
    }

    #[test]
    fn unsafe_filters_fail_at_compile_time() {
        let mut schema = test_schema();
        schema.text_fields.insert("tag".to_string());
        let mut filters = FilterSet::new();
        filters.insert(
            "tag".to_string(),
            Predicate::Comparison {
                op: ComparisonOp::Eq,
                constant: Literal::String("x".to_string()),
            },
        );
        let err = ScanRequest::compile(
            &schema,
            "logs",
            None,
            &filters,
            &projected(&["_id"]),
            None,
            0,
            &options(1000, 5),
        )
        .unwrap_err();
        assert!(matches!(err, crate::result::Error::Filter(_)));
    }

    #[test]
    fn source_projection_lists_output_field_paths_only() {
        let request = compile(&projected(&["_id", "tag", "count"]), None, 0, &options(1000, 5));
        assert_eq!(request.body["_source"], json!(["tag", "count"]));
    }

    #[test]
    fn filter_only_columns_are_excluded_from_the_source() {
        let projection = Projection {
            output: vec!["_id".to_string(), "tag".to_string()],
            filter_only: vec!["count".to_string()],
        };
        let request = compile(&projection, None, 0, &options(1000, 5));
        assert_eq!(request.body["_source"], json!(["tag"]));
    }

    #[test]
    fn a_requested_residual_column_needs_the_full_document() {
        let request = compile(&projected(&["_id", "tag", "_unmapped_"]), None, 0, &options(1000, 5));
        assert_eq!(request.body.get("_source"), None);
    }

    #[test]
    fn id_only_projections_skip_the_source_list() {
        let request = compile(&projected(&["_id"]), None, 0, &options(1000, 5));
        assert_eq!(request.body.get("_source"), None);
    }

    #[test]
    fn small_limits_fetch_everything_in_one_page() {
        let request = compile(&projected(&["_id"]), Some(5), 3, &options(1000, 5));
        assert_eq!(request.first_page_size, 8);

        let request = compile(&projected(&["_id"]), Some(5000), 1, &options(1000, 5));
        assert_eq!(request.first_page_size, 1000);

        let request = compile(&projected(&["_id"]), None, 3, &options(1000, 5));
        assert_eq!(request.first_page_size, 1000);
    }
}

mod cursor_session {
    use super::*;

    fn hits(ids: std::ops::RangeInclusive<u32>) -> Vec<serde_json::Value> {
        ids.map(|i| json!({ "_id": i.to_string(), "_source": { "tag": format!("t{i}") } }))
            .collect()
    }

    #[test]
    fn limit_and_offset_select_the_requested_window() {
        // limit=5, offset=3 against 10 matching documents: rows 4-8 in store
        // order, from a single 8-row page.
        let request = compile(&projected(&["_id", "tag"]), Some(5), 3, &options(1000, 5));
        let (mut scan, transport) = open_scan(
            vec![
                Reply::Body(200, page_body(Some("s1"), &hits(1..=8))),
                Reply::Status(200, "{}"),
            ],
            request,
        );

        let rows = drain(&mut scan);
        assert_eq!(rows.len(), 5);
        let ids: Vec<_> = rows
            .iter()
            .map(|row| match &row[0] {
                CellValue::Str(id) => id.as_str(),
                other => panic!("expected id string, got {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec!["4", "5", "6", "7", "8"]);

        // One page request sized limit+offset, then only the cursor close.
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].1, "/logs/_search?scroll=5m&size=8");
        assert_eq!(requests[1].0, crate::client::Method::Delete);
    }

    #[test]
    fn scrolling_continues_until_an_empty_page() {
        let request = compile(&projected(&["_id", "tag"]), None, 0, &options(2, 1));
        let (mut scan, transport) = open_scan(
            vec![
                Reply::Body(200, page_body(Some("s1"), &hits(1..=2))),
                Reply::Body(200, page_body(Some("s1"), &hits(3..=4))),
                Reply::Body(200, page_body(Some("s1"), &hits(5..=5))),
                Reply::Body(200, page_body(Some("s1"), &[])),
                Reply::Status(200, "{}"),
            ],
            request,
        );

        let rows = drain(&mut scan);
        assert_eq!(rows.len(), 5);
        assert_eq!(
            transport.requests_matching(crate::client::Method::Post, "/_search/scroll"),
            3
        );
        assert_eq!(
            transport.requests_matching(crate::client::Method::Delete, "/_search/scroll"),
            1
        );
    }

    #[test]
    fn an_empty_first_page_exhausts_immediately() {
        let request = compile(&projected(&["_id"]), None, 0, &options(1000, 5));
        let (mut scan, transport) = open_scan(
            vec![
                Reply::Body(200, page_body(Some("s1"), &[])),
                Reply::Status(200, "{}"),
            ],
            request,
        );

        assert_eq!(scan.next_row().unwrap(), None);
        // Exhausted is terminal: no further requests on repeated pulls.
        assert_eq!(scan.next_row().unwrap(), None);
        assert_eq!(transport.request_count(), 2);
    }

    #[test]
    fn the_cursor_is_closed_exactly_once() {
        let request = compile(&projected(&["_id"]), Some(1), 0, &options(1000, 5));
        let (mut scan, transport) = open_scan(
            vec![
                Reply::Body(200, page_body(Some("s1"), &hits(1..=3))),
                Reply::Status(200, "{}"),
            ],
            request,
        );

        drain(&mut scan);
        drop(scan);
        assert_eq!(
            transport.requests_matching(crate::client::Method::Delete, "/_search/scroll"),
            1
        );
    }

    #[test]
    fn abandoning_a_scan_closes_the_cursor() {
        let request = compile(&projected(&["_id"]), None, 0, &options(1000, 5));
        let (mut scan, transport) = open_scan(
            vec![
                Reply::Body(200, page_body(Some("s1"), &hits(1..=3))),
                Reply::Status(200, "{}"),
            ],
            request,
        );

        assert!(scan.next_row().unwrap().is_some());
        drop(scan);
        assert_eq!(
            transport.requests_matching(crate::client::Method::Delete, "/_search/scroll"),
            1
        );
    }

    #[test]
    fn a_failing_cursor_close_is_swallowed() {
        let request = compile(&projected(&["_id"]), Some(1), 0, &options(1000, 5));
        let (mut scan, _transport) = open_scan(
            vec![
                Reply::Body(200, page_body(Some("s1"), &hits(1..=2))),
                Reply::Fail("connection reset"),
            ],
            request,
        );

        assert!(scan.next_row().unwrap().is_some());
        // Hitting the limit exhausts the scan and closes the cursor; the
        // failed close must not surface.
        assert_eq!(scan.next_row().unwrap(), None);
    }

    #[test]
    fn a_missing_cursor_token_ends_the_scan_after_one_page() {
        let request = compile(&projected(&["_id"]), None, 0, &options(2, 1));
        let (mut scan, transport) = open_scan(
            vec![Reply::Body(200, page_body(None, &hits(1..=2)))],
            request,
        );

        let rows = drain(&mut scan);
        assert_eq!(rows.len(), 2);
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn transport_exhaustion_aborts_the_scan() {
        let request = compile(&projected(&["_id"]), None, 0, &options(2, 1));
        let (mut scan, _transport) = open_scan(
            vec![
                Reply::Body(200, page_body(Some("s1"), &hits(1..=2))),
                Reply::Status(404, "cursor expired"),
                Reply::Status(200, "{}"),
            ],
            request,
        );

        assert!(scan.next_row().unwrap().is_some());
        assert!(scan.next_row().unwrap().is_some());
        assert!(scan.next_row().is_err());
    }
}

mod row_decoding {
    use super::*;
    use super::super::decode::decode_value;

    #[test]
    fn rows_decode_all_three_zones() {
        let request = compile(
            &projected(&["_id", "tag", "count", "_unmapped_"]),
            None,
            0,
            &options(1000, 5),
        );
        let hit = json!({
            "_id": "doc-1",
            "_source": { "tag": "a", "count": 7, "stray": { "x": 1 } }
        });
        let (mut scan, _) = open_scan(
            vec![
                Reply::Body(200, page_body(Some("s1"), &[hit])),
                Reply::Body(200, page_body(Some("s1"), &[])),
                Reply::Status(200, "{}"),
            ],
            request,
        );

        let row = scan.next_row().unwrap().unwrap();
        assert_eq!(row[0], CellValue::Str("doc-1".to_string()));
        assert_eq!(row[1], CellValue::Str("a".to_string()));
        assert_eq!(row[2], CellValue::Int(7));
        assert_eq!(row[3], CellValue::Str(r#"{"stray":{"x":1}}"#.to_string()));
    }

    #[test]
    fn list_columns_wrap_bare_scalars() {
        let ty = ColumnType::List(Box::new(ColumnType::Varchar));
        assert_eq!(
            decode_value(&json!(["a", "b"]), &ty, "keyword"),
            CellValue::List(vec![
                CellValue::Str("a".to_string()),
                CellValue::Str("b".to_string())
            ])
        );
        assert_eq!(
            decode_value(&json!("a"), &ty, "keyword"),
            CellValue::List(vec![CellValue::Str("a".to_string())])
        );
        assert_eq!(decode_value(&json!(null), &ty, "keyword"), CellValue::Null);
    }

    #[test]
    fn geo_columns_normalize_every_input_encoding() {
        let ty = ColumnType::Varchar;
        let expected =
            CellValue::Str(r#"{"type":"Point","coordinates":[-71.34,41.12]}"#.to_string());

        assert_eq!(
            decode_value(&json!({ "lat": 41.12, "lon": -71.34 }), &ty, "geo_point"),
            expected
        );
        assert_eq!(
            decode_value(&json!([-71.34, 41.12]), &ty, "geo_point"),
            expected
        );
        assert_eq!(
            decode_value(&json!("41.12,-71.34"), &ty, "geo_point"),
            expected
        );
        assert_eq!(
            decode_value(&json!("POINT (-71.34 41.12)"), &ty, "geo_point"),
            expected
        );
        assert_eq!(
            decode_value(&json!("not geo at all"), &ty, "geo_point"),
            CellValue::Null
        );
    }

    #[test]
    fn struct_columns_decode_declared_children() {
        let ty = ColumnType::Struct(vec![
            ("name".to_string(), ColumnType::Varchar),
            ("age".to_string(), ColumnType::Int),
        ]);
        assert_eq!(
            decode_value(&json!({ "name": "ada", "age": 36, "extra": true }), &ty, "object"),
            CellValue::Struct(vec![
                ("name".to_string(), CellValue::Str("ada".to_string())),
                ("age".to_string(), CellValue::Int(36)),
            ])
        );
        assert_eq!(
            decode_value(&json!({ "name": "ada" }), &ty, "object"),
            CellValue::Struct(vec![
                ("name".to_string(), CellValue::Str("ada".to_string())),
                ("age".to_string(), CellValue::Null),
            ])
        );
        assert_eq!(decode_value(&json!(42), &ty, "object"), CellValue::Null);
    }

    #[test]
    fn numeric_coercions_do_not_truncate() {
        assert_eq!(decode_value(&json!(7), &ColumnType::BigInt, "long"), CellValue::Int(7));
        // A float in an integer column is NULL rather than silently truncated.
        assert_eq!(decode_value(&json!(7.5), &ColumnType::BigInt, "long"), CellValue::Null);
        assert_eq!(
            decode_value(&json!(7), &ColumnType::Double, "double"),
            CellValue::Float(7.0)
        );
        assert_eq!(
            decode_value(&json!("7"), &ColumnType::BigInt, "long"),
            CellValue::Null
        );
    }

    #[test]
    fn timestamps_accept_iso_strings_and_epoch_millis() {
        let expected = CellValue::Timestamp(
            chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(3, 4, 5)
                .unwrap(),
        );
        assert_eq!(
            decode_value(&json!("2024-01-02T03:04:05"), &ColumnType::Timestamp, "date"),
            expected
        );
        assert_eq!(
            decode_value(&json!("2024-01-02T03:04:05Z"), &ColumnType::Timestamp, "date"),
            expected
        );
        assert_eq!(
            decode_value(&json!(1704164645000i64), &ColumnType::Timestamp, "date"),
            expected
        );
        assert_eq!(
            decode_value(&json!("yesterday"), &ColumnType::Timestamp, "date"),
            CellValue::Null
        );
    }

    #[test]
    fn varchar_columns_serialize_non_string_content() {
        assert_eq!(
            decode_value(&json!({ "a": 1 }), &ColumnType::Varchar, "object"),
            CellValue::Str(r#"{"a":1}"#.to_string())
        );
        assert_eq!(
            decode_value(&json!(true), &ColumnType::Varchar, "keyword"),
            CellValue::Str("true".to_string())
        );
    }

    #[test]
    fn residual_extraction_is_partial_for_partially_declared_objects() {
        let schema = test_schema();
        let source = json!({
            "tag": "a",
            "employee": { "name": "ada", "badge": 7 },
            "stray": [1, 2]
        });
        assert_eq!(
            super::super::decode::collect_unmapped(&source, &schema.mapped_paths),
            Some(json!({ "employee": { "badge": 7 }, "stray": [1, 2] }))
        );

        let fully_mapped = json!({ "tag": "a", "employee": { "name": "ada" } });
        assert_eq!(
            super::super::decode::collect_unmapped(&fully_mapped, &schema.mapped_paths),
            None
        );
    }

    #[test]
    fn mapped_terminal_objects_are_not_residual() {
        let schema = test_schema();
        // A geo point's object encoding is covered by its mapping entry.
        let source = json!({ "location": { "lat": 1.0, "lon": 2.0 } });
        assert_eq!(
            super::super::decode::collect_unmapped(&source, &schema.mapped_paths),
            None
        );
    }
}
