// mindrecord-core/tests/save_op.rs

//! End-to-end tests: write a shard set, read it back, re-save it through the
//! convert pipeline and compare.

use std::path::Path;

use mindrecord_core::config::{MindRecordConfig, ReaderConfig, StorageConfig};
use mindrecord_core::schema::{sanitize_field_name, FieldSpec, FieldType, Schema};
use mindrecord_core::value::{Record, Tensor, TensorData, Value};
use mindrecord_core::{MindRecordError, Result, Session};
use tempfile::TempDir;

const CV_FILE_NAME1: &str = "temp.mindrecord";
const CV_FILE_NAME2: &str = "auto.mindrecord";

fn create_test_session() -> (Session, TempDir) {
    create_test_session_with(ReaderConfig::default())
}

fn create_test_session_with(reader: ReaderConfig) -> (Session, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = MindRecordConfig {
        storage: StorageConfig {
            base_path: temp_dir.path().to_path_buf(),
            ..Default::default()
        },
        reader,
        ..Default::default()
    };
    (Session::from_config(config).unwrap(), temp_dir)
}

fn record(fields: Vec<(&str, Value)>) -> Record {
    fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn write_with_schema(session: &Session, path: &str, schema: Schema, data: &[Record]) {
    let mut writer = session.create_writer(path, 1).unwrap();
    writer.add_schema(schema, "schema").unwrap();
    assert_eq!(writer.write_records(data).unwrap(), data.len() as u64);
    writer.commit().unwrap();
}

fn read_all(session: &Session, path: &str) -> Vec<Record> {
    let reader = session.open_reader(path).unwrap();
    reader.records().collect::<Result<Vec<_>>>().unwrap()
}

fn resave(session: &Session) {
    let reader = session.open_reader(CV_FILE_NAME1).unwrap();
    session
        .save(reader.records(), CV_FILE_NAME2, 1, "mindrecord")
        .unwrap();
}

fn rows<I: IntoIterator<Item = Record>>(records: I) -> impl Iterator<Item = Result<Record>> {
    records.into_iter().map(Ok)
}

fn uint8(bytes: &[u8]) -> Value {
    Value::Array(Tensor::vector(TensorData::UInt8(bytes.to_vec())))
}

fn dir_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[test]
fn test_only_bin_data() {
    let (session, _temp) = create_test_session();

    let schema = (1..=5).fold(Schema::new(), |s, i| {
        s.with_field(format!("image{i}"), FieldSpec::scalar(FieldType::Bytes))
    });
    let data: Vec<Record> = [1, 2, 3, 5, 6]
        .iter()
        .map(|n| {
            (1..=5)
                .zip(["abc", "def", "ghi", "jkl", "mno"])
                .map(|(i, suffix)| {
                    let bytes = format!("image{n} bytes {suffix}").into_bytes();
                    (format!("image{i}"), Value::Bytes(bytes))
                })
                .collect()
        })
        .collect();

    write_with_schema(&session, CV_FILE_NAME1, schema, &data);
    resave(&session);

    let reader = session.open_reader(CV_FILE_NAME2).unwrap();
    assert_eq!(reader.get_size(), 5);

    let saved = read_all(&session, CV_FILE_NAME2);
    assert_eq!(saved.len(), 5);
    for (item, original) in saved.iter().zip(&data) {
        assert_eq!(item.len(), 5);
        for (field, value) in original {
            let Value::Bytes(bytes) = value else { unreachable!() };
            assert_eq!(item[field], uint8(bytes), "field {field}");
        }
    }
}

#[test]
fn test_only_raw_data() {
    let (session, _temp) = create_test_session();

    let schema = Schema::from_json(
        r#"{"file_name": {"type": "string"}, "label": {"type": "int32"}}"#,
    )
    .unwrap();
    let labels = [43, 91, 61, 29, 78, 37];
    let data: Vec<Record> = labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            record(vec![
                ("file_name", Value::from(format!("{:03}.jpg", i + 1))),
                ("label", Value::Int64(*label)),
            ])
        })
        .collect();

    write_with_schema(&session, CV_FILE_NAME1, schema, &data);
    resave(&session);

    let saved = read_all(&session, CV_FILE_NAME2);
    assert_eq!(saved.len(), 6);
    for (i, item) in saved.iter().enumerate() {
        assert_eq!(item.len(), 2);
        assert_eq!(item["file_name"], Value::from(format!("{:03}.jpg", i + 1)));
        assert_eq!(item["label"], Value::Int32(labels[i] as i32));
    }
}

#[test]
fn test_multi_bytes() {
    let (session, _temp) = create_test_session();

    let schema = Schema::from_json(
        r#"{
            "file_name": {"type": "string"},
            "float32_array": {"type": "float32", "shape": [-1]},
            "float64_array": {"type": "float64", "shape": [-1]},
            "float32": {"type": "float32"},
            "float64": {"type": "float64"},
            "source_sos_ids": {"type": "int32", "shape": [-1]},
            "source_sos_mask": {"type": "int64", "shape": [-1]},
            "image1": {"type": "bytes"},
            "image2": {"type": "bytes"},
            "image3": {"type": "bytes"},
            "label": {"type": "int32"},
            "image4": {"type": "bytes"},
            "image5": {"type": "bytes"}
        }"#,
    )
    .unwrap();

    let labels = [43, 91, 61, 29, 78, 37];
    let third = [3.1234f32, 4.1234, 5.1234, 6.1234, 7.1234, 7.1234];
    let middle = [50.13514312414, 60.13514312414, 70.13514312414, 80.13514312414, 90.13514312414, 90.13514312414];
    let float32s = [3456.12345, 3456.12445, 3456.12545, 3456.12645, 3456.12745, 3456.12745];
    let float64s = [
        1987654321.123456785,
        1987654321.123456786,
        1987654321.123456787,
        1987654321.123456788,
        1987654321.123456789,
        1987654321.123456789,
    ];
    let images = [1, 2, 3, 4, 5, 6];

    let data: Vec<Record> = (0..6)
        .map(|i| {
            let mut r = record(vec![
                ("file_name", Value::from(format!("{:03}.jpg", i + 1))),
                ("label", Value::Int32(labels[i])),
                (
                    "float32_array",
                    Value::Array(Tensor::vector(TensorData::Float32(vec![
                        1.2, 2.78, third[i], 4.9871, 5.12341,
                    ]))),
                ),
                (
                    "float64_array",
                    Value::Array(Tensor::vector(TensorData::Float64(vec![
                        48.1234556789,
                        49.3251241431,
                        middle[i],
                        51.8971298471,
                        123414314.2141243,
                        87.1212122,
                    ]))),
                ),
                ("float32", Value::Float64(float32s[i])),
                ("float64", Value::Float64(float64s[i])),
                (
                    "source_sos_ids",
                    Value::Array(Tensor::vector(TensorData::Int32(vec![1 + 10 * i as i32, 2, 3, 4, 5]))),
                ),
                (
                    "source_sos_mask",
                    Value::Array(Tensor::vector(TensorData::Int64(vec![
                        6 + 10 * i as i64, 7, 8, 9, 10, 11, 12,
                    ]))),
                ),
            ]);
            for (n, suffix) in (1..=5).zip(["abc", "def", "ghi", "jkl", "mno"]) {
                let bytes = format!("image{} bytes {suffix}", images[i]).into_bytes();
                r.insert(format!("image{n}"), Value::Bytes(bytes));
            }
            r
        })
        .collect();

    write_with_schema(&session, CV_FILE_NAME1, schema, &data);
    resave(&session);

    let saved = read_all(&session, CV_FILE_NAME2);
    assert_eq!(saved.len(), 6);
    for (i, (item, original)) in saved.iter().zip(&data).enumerate() {
        assert_eq!(item.len(), 13);
        assert_eq!(item["file_name"], original["file_name"]);
        assert_eq!(item["label"], Value::Int32(labels[i]));
        assert_eq!(item["float32_array"], original["float32_array"]);
        assert_eq!(item["float64_array"], original["float64_array"]);
        assert_eq!(item["float32"], Value::Float32(float32s[i] as f32));
        assert_eq!(item["float64"], Value::Float64(float64s[i]));
        assert_eq!(item["source_sos_ids"], original["source_sos_ids"]);
        assert_eq!(item["source_sos_mask"], original["source_sos_mask"]);
        for n in 1..=5 {
            let field = format!("image{n}");
            let Value::Bytes(bytes) = &original[&field] else { unreachable!() };
            assert_eq!(item[&field], uint8(bytes));
        }
    }
}

#[test]
fn test_generator_1d() {
    let (session, _temp) = create_test_session();

    let source = rows((0..10i64).map(|i| {
        record(vec![(
            "data",
            Value::Array(Tensor::vector(TensorData::Int64(vec![i]))),
        )])
    }));
    session.save(source, CV_FILE_NAME2, 1, "mindrecord").unwrap();

    let saved = read_all(&session, CV_FILE_NAME2);
    assert_eq!(saved.len(), 10);
    for (i, item) in saved.iter().enumerate() {
        assert_eq!(
            item["data"],
            Value::Array(Tensor::vector(TensorData::Int64(vec![i as i64])))
        );
    }
}

/// 64 values batched by 4 into `[4, 1]` tensors, repeated three times.
fn batched<T: Copy>(values: &[T], wrap: fn(Vec<T>) -> TensorData) -> Vec<Result<Record>> {
    let batches: Vec<Record> = values
        .chunks(4)
        .map(|chunk| {
            let tensor = Tensor::new(vec![4, 1], wrap(chunk.to_vec())).unwrap();
            record(vec![("data", Value::Array(tensor))])
        })
        .collect();
    rows((0..3).flat_map(|_| batches.clone())).collect()
}

fn expected_batches(wrap: fn(Vec<i64>) -> TensorData) -> Vec<Value> {
    let values: Vec<i64> = (0..64).collect();
    let batches: Vec<Value> = values
        .chunks(4)
        .map(|chunk| Value::Array(Tensor::new(vec![4, 1], wrap(chunk.to_vec())).unwrap()))
        .collect();
    (0..3).flat_map(|_| batches.clone()).collect()
}

#[test]
fn test_batched_types_keep_values_and_shape() {
    let cases: Vec<(&str, Vec<Result<Record>>, Vec<Value>)> = vec![
        (
            "int8",
            batched(&(0..64).collect::<Vec<i8>>(), TensorData::Int8),
            expected_batches(|v| TensorData::Int32(v.into_iter().map(|x| x as i32).collect())),
        ),
        (
            "int16",
            batched(&(0..64).collect::<Vec<i16>>(), TensorData::Int16),
            expected_batches(|v| TensorData::Int32(v.into_iter().map(|x| x as i32).collect())),
        ),
        (
            "int32",
            batched(&(0..64).collect::<Vec<i32>>(), TensorData::Int32),
            expected_batches(|v| TensorData::Int32(v.into_iter().map(|x| x as i32).collect())),
        ),
        (
            "int64",
            batched(&(0..64).collect::<Vec<i64>>(), TensorData::Int64),
            expected_batches(TensorData::Int64),
        ),
        (
            "uint16",
            batched(&(0..64).collect::<Vec<u16>>(), TensorData::UInt16),
            expected_batches(|v| TensorData::Int32(v.into_iter().map(|x| x as i32).collect())),
        ),
        (
            "uint32",
            batched(&(0..64).collect::<Vec<u32>>(), TensorData::UInt32),
            expected_batches(TensorData::Int64),
        ),
        (
            "float32",
            batched(&(0..64).map(|x| x as f32).collect::<Vec<f32>>(), TensorData::Float32),
            expected_batches(|v| TensorData::Float32(v.into_iter().map(|x| x as f32).collect())),
        ),
        (
            "float64",
            batched(&(0..64).map(|x| x as f64).collect::<Vec<f64>>(), TensorData::Float64),
            expected_batches(|v| TensorData::Float64(v.into_iter().map(|x| x as f64).collect())),
        ),
    ];

    for (name, source, expected) in cases {
        let (session, _temp) = create_test_session();
        session
            .save(source.into_iter(), CV_FILE_NAME2, 1, "mindrecord")
            .unwrap();

        let saved = read_all(&session, CV_FILE_NAME2);
        assert_eq!(saved.len(), 48, "{name}");
        for (item, want) in saved.iter().zip(&expected) {
            assert_eq!(&item["data"], want, "{name}");
        }
    }
}

#[test]
fn test_num_files_boundaries() {
    let (session, temp_dir) = create_test_session();
    let source = || rows((0..3i32).map(|i| record(vec![("label", Value::Int32(i))])));

    for bad in [0, 1001] {
        let err = session
            .save(source(), CV_FILE_NAME2, bad, "mindrecord")
            .unwrap_err();
        assert_eq!(err.to_string(), "num_files should between 1 and 1000.");
    }
    assert_eq!(dir_entries(temp_dir.path()), 0);

    let summary = session.save(source(), CV_FILE_NAME2, 1000, "mindrecord").unwrap();
    assert_eq!(summary.shard_files.len(), 1000);
    assert!(temp_dir.path().join("auto.mindrecord999").exists());

    let reader = session.open_reader(CV_FILE_NAME2).unwrap();
    assert_eq!(reader.get_size(), 3);
}

#[test]
fn test_tfrecord_format_rejected_before_io() {
    let (session, temp_dir) = create_test_session();
    let source = rows((0..10i64).map(|i| record(vec![("data", Value::Int64(i))])));

    let err = session.save(source, CV_FILE_NAME2, 1, "tfrecord").unwrap_err();
    assert_eq!(err.to_string(), "tfrecord dataset format is not supported.");
    assert_eq!(dir_entries(temp_dir.path()), 0);
}

#[test]
fn test_cast_name_on_save() {
    let (session, _temp) = create_test_session();
    let names = [
        "image/encoded",
        "image/class/label",
        "a b",
        "x{1}",
        "plain_name",
        "tab\tseparated",
        "café",
    ];

    let source = rows(std::iter::once(
        names
            .iter()
            .map(|n| (n.to_string(), Value::Int64(1)))
            .collect::<Record>(),
    ));
    let summary = session.save(source, CV_FILE_NAME2, 1, "mindrecord").unwrap();

    let reader = session.open_reader(CV_FILE_NAME2).unwrap();
    for name in names {
        let stored = sanitize_field_name(name);
        assert_eq!(summary.field_names[name], stored);
        assert!(reader.schema().contains(&stored), "{stored}");
        assert_eq!(sanitize_field_name(&stored), stored);
    }
    assert_eq!(summary.field_names["tab\tseparated"], "tab_separated");
    assert_eq!(summary.field_names["café"], "caf_");
}

#[test]
fn test_order_preserved_across_worker_counts() {
    let (session, _temp) = create_test_session();
    let source = rows((0..200i64).map(|i| {
        record(vec![
            ("id", Value::Int64(i)),
            ("blob", Value::Bytes(vec![i as u8; (i % 17) as usize])),
        ])
    }));
    session.save(source, CV_FILE_NAME2, 4, "mindrecord").unwrap();

    for workers in [1, 2, 4, 8] {
        let config = ReaderConfig {
            num_parallel_workers: workers,
            ..Default::default()
        };
        let reader =
            mindrecord_core::ShardReader::open(session.storage().clone(), CV_FILE_NAME2, config).unwrap();
        let ids: Vec<Value> = reader.records().map(|r| r.unwrap()["id"].clone()).collect();
        let expected: Vec<Value> = (0..200).map(Value::Int64).collect();
        assert_eq!(ids, expected, "workers {workers}");
    }
}

#[test]
fn test_shuffled_reader_is_a_permutation() {
    let (session, _temp) = create_test_session_with(ReaderConfig {
        shuffle: true,
        num_parallel_workers: 3,
        ..Default::default()
    });
    let source = rows((0..64i64).map(|i| record(vec![("id", Value::Int64(i))])));
    session.save(source, CV_FILE_NAME2, 2, "mindrecord").unwrap();

    let reader = session.open_reader(CV_FILE_NAME2).unwrap();
    let mut ids: Vec<i64> = reader
        .records()
        .map(|r| match r.unwrap()["id"] {
            Value::Int64(v) => v,
            _ => unreachable!(),
        })
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..64).collect::<Vec<_>>());
}

#[test]
fn test_concurrent_writer_is_busy() {
    let (session, _temp) = create_test_session();

    let _writer = session.create_writer(CV_FILE_NAME2, 2).unwrap();
    let source = rows([record(vec![("id", Value::Int64(1))])]);
    let err = session.save(source, CV_FILE_NAME2, 2, "mindrecord").unwrap_err();
    assert!(matches!(err, MindRecordError::DestinationBusy { .. }));
}

#[test]
fn test_uncommitted_set_not_readable() {
    let (session, _temp) = create_test_session();

    let mut writer = session.create_writer(CV_FILE_NAME1, 1).unwrap();
    writer
        .add_schema(Schema::new().with_field("id", FieldSpec::scalar(FieldType::Int64)), "schema")
        .unwrap();
    writer
        .write_record(&record(vec![("id", Value::Int64(1))]))
        .unwrap();
    drop(writer);

    let err = session.open_reader(CV_FILE_NAME1).err().unwrap();
    assert!(matches!(err, MindRecordError::NotCommitted { .. }));
}

#[test]
fn test_flipped_index_byte_is_corrupt_index() {
    let (session, temp_dir) = create_test_session();
    let source = rows((0..5i64).map(|i| record(vec![("id", Value::Int64(i))])));
    session.save(source, CV_FILE_NAME2, 1, "mindrecord").unwrap();

    let db = temp_dir.path().join("auto.mindrecord.db");
    let mut bytes = std::fs::read(&db).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x01;
    std::fs::write(&db, bytes).unwrap();

    let err = session.open_reader(CV_FILE_NAME2).err().unwrap();
    assert!(matches!(err, MindRecordError::CorruptIndex { .. }));
}

#[test]
fn test_compressed_save_roundtrip() {
    for compression in ["lz4", "zstd"] {
        let temp_dir = TempDir::new().unwrap();
        let mut config = MindRecordConfig::default();
        config.storage.base_path = temp_dir.path().to_path_buf();
        config.writer.compression = compression.to_string();
        let session = Session::from_config(config).unwrap();

        let data: Vec<Record> = (0..20u8)
            .map(|i| {
                record(vec![
                    ("image", Value::Bytes(vec![i; 256])),
                    (
                        "boxes",
                        Value::Array(Tensor::new(vec![2, 2], TensorData::Float32(vec![i as f32; 4])).unwrap()),
                    ),
                ])
            })
            .collect();
        session
            .save(rows(data.clone()), CV_FILE_NAME2, 3, "mindrecord")
            .unwrap();

        let saved = read_all(&session, CV_FILE_NAME2);
        for (item, original) in saved.iter().zip(&data) {
            assert_eq!(item["boxes"], original["boxes"], "{compression}");
            let Value::Bytes(bytes) = &original["image"] else { unreachable!() };
            assert_eq!(item["image"], uint8(bytes), "{compression}");
        }
    }
}

#[test]
fn test_tensor_with_inconsistent_shape_aborts_save() {
    let (session, temp_dir) = create_test_session();
    let ids = |shape: Vec<usize>, data: Vec<i32>| -> Record {
        [(
            "ids".to_string(),
            Value::Array(Tensor {
                shape,
                data: TensorData::Int32(data),
            }),
        )]
        .into_iter()
        .collect()
    };

    // Malformed on the first record, then behind a valid one.
    for source in [
        vec![ids(vec![3], vec![1, 2])],
        vec![ids(vec![2], vec![1, 2]), ids(vec![2, 2], vec![1, 2, 3])],
    ] {
        let err = session.save(rows(source), CV_FILE_NAME2, 2, "mindrecord").unwrap_err();
        assert!(matches!(err, MindRecordError::TypeMismatch { ref field, .. } if field == "ids"));
        assert_eq!(dir_entries(temp_dir.path()), 0);
        assert!(!session.exists(CV_FILE_NAME2).unwrap());
    }
}
