//! End-to-end behaviour of classification, serialization and snapshots.

use std::collections::BTreeMap;

use matbridge_core::compress::{serialize_value, value_from_json, StatNumber};
use matbridge_core::{
    classify, decode_full, snapshot, CellArray, CompressionConfig, NumericArray, OpaqueValue,
    RuntimeValue, SerializedVariable, Shape, SnapshotEntry, Tier,
};
use serde_json::json;

fn column_major(rows: usize, cols: usize, f: impl Fn(usize, usize) -> f64) -> Vec<f64> {
    let mut data = Vec::with_capacity(rows * cols);
    for c in 0..cols {
        for r in 0..rows {
            data.push(f(r, c));
        }
    }
    data
}

#[test]
fn three_by_three_matrix_is_full_row_major() {
    let data = column_major(3, 3, |r, c| (r * 3 + c + 1) as f64);
    let value = RuntimeValue::Numeric(NumericArray::from_f64(Shape::matrix(3, 3), data).unwrap());
    let out = serialize_value(&value, &CompressionConfig::default()).unwrap();
    let json = serde_json::to_value(&out).unwrap();
    assert_eq!(json["_type"], json!("full"));
    assert_eq!(json["shape"], json!([3, 3]));
    assert_eq!(json["dtype"], json!("double"));
    assert_eq!(
        json["data"],
        json!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]])
    );
}

#[test]
fn sine_wave_is_summarized() {
    let n = 500;
    let xs: Vec<f64> = (0..n).map(|i| 10.0 * i as f64 / (n - 1) as f64).collect();
    let ys: Vec<f64> = xs.iter().map(|x| x.sin()).collect();
    let value = RuntimeValue::Numeric(NumericArray::row(ys.clone()));

    let out = serialize_value(&value, &CompressionConfig::default()).unwrap();
    let SerializedVariable::Summary(summary) = out else {
        panic!("expected summary");
    };
    assert_eq!(summary.shape, vec![1, 500]);
    assert_eq!(summary.total_elements, 500);
    assert_eq!(summary.memory_usage_bytes, 4000);

    let min = ys.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mean = ys.iter().sum::<f64>() / n as f64;
    assert_eq!(summary.min, Some(StatNumber::Float(min)));
    assert_eq!(summary.max, Some(StatNumber::Float(max)));
    assert!((summary.mean.unwrap() - mean).abs() < 1e-12);

    let preview: Vec<f64> = summary
        .sample_data
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    assert_eq!(preview, ys[..10].to_vec());
}

#[test]
fn large_matrix_is_metadata_only() {
    let value = RuntimeValue::Numeric(
        NumericArray::from_f64(Shape::matrix(500, 500), vec![1.0; 250_000]).unwrap(),
    );
    let config = CompressionConfig::default();
    assert_eq!(classify(&value, &config), Tier::Metadata);
    let SerializedVariable::Metadata(meta) = serialize_value(&value, &config).unwrap() else {
        panic!("expected metadata");
    };
    assert!(meta.sample_data.len() <= 3);
    assert!(meta.note.contains("250000"));
    assert_eq!(meta.memory_usage_bytes, 2_000_000);
}

#[test]
fn thresholds_follow_config() {
    let config = CompressionConfig::new(5, 50, 4).unwrap();
    let value = RuntimeValue::Numeric(NumericArray::row(vec![1.0; 6]));
    let SerializedVariable::Summary(summary) = serialize_value(&value, &config).unwrap() else {
        panic!("expected summary");
    };
    assert_eq!(summary.sample_data.len(), 4);
}

#[test]
fn full_payloads_decode_to_the_same_value() {
    let values = [
        json!(3.25),
        json!("label"),
        json!([[1, 2], [3, 4]]),
        json!([true, false]),
        json!([1, "a", [2, 3]]),
    ];
    let config = CompressionConfig::default();
    for input in values {
        let value = value_from_json(&input).unwrap();
        let SerializedVariable::Full(payload) = serialize_value(&value, &config).unwrap() else {
            panic!("expected full payload for {input}");
        };
        assert_eq!(decode_full(&payload).unwrap(), value, "{input}");
    }
}

#[test]
fn one_bad_variable_does_not_spoil_the_snapshot() {
    let mut ws = BTreeMap::new();
    ws.insert("a".to_string(), RuntimeValue::Scalar(1.0));
    ws.insert("t".to_string(), RuntimeValue::Text("ok".into()));
    ws.insert(
        "c".to_string(),
        RuntimeValue::Cell(CellArray::row(vec![RuntimeValue::Scalar(2.0)])),
    );
    ws.insert(
        "h".to_string(),
        RuntimeValue::Opaque(OpaqueValue {
            class_name: "matlab.graphics.Figure".into(),
            repr: None,
        }),
    );
    let snap = snapshot(&ws, &CompressionConfig::default()).unwrap();
    assert_eq!(snap.len(), 4);
    assert_eq!(snap.error_count(), 1);
    match snap.get("h").unwrap() {
        SnapshotEntry::Error(marker) => {
            assert_eq!(marker.name, "h");
            assert!(marker.message.contains("matlab.graphics.Figure"));
        }
        other => panic!("expected error marker, got {other:?}"),
    }
    for name in ["a", "t", "c"] {
        assert!(!snap.get(name).unwrap().is_error(), "{name}");
    }
}
