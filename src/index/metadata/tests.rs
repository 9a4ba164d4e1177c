use super::*;

fn long_record() -> CharacterRecord {
    CharacterRecord::from_fields([
        ("Overview[]", "a".repeat(15_000)),
        ("Pre-Apocalypse[]", "b".repeat(15_000)),
        ("Post-Apocalypse[]", "c".repeat(15_000)),
        ("Trivia[]", "short".to_string()),
        ("Name", "Negan".to_string()),
    ])
}

#[test]
fn serialized_size_matches_serde_json() {
    let records = [
        CharacterRecord::new(),
        CharacterRecord::from_fields([("Name", "Rick Grimes")]),
        CharacterRecord::from_fields([
            ("Name", "Michonne"),
            ("Overview[]", "Quote \"katana\"\nand unicode: Ñ 🗡"),
        ]),
    ];

    for record in &records {
        let json = serde_json::to_vec(record).expect("should serialize record");
        assert_eq!(serialized_size(record), json.len());
    }
}

#[test]
fn small_records_are_kept_whole() {
    let record = CharacterRecord::from_fields([("Name", "Glenn Rhee"), ("Overview", "Pizza")]);
    assert_eq!(truncate_metadata(&record, DEFAULT_METADATA_MAX_BYTES), record);
}

#[test]
fn name_is_emitted_first() {
    let truncated = truncate_metadata(&long_record(), DEFAULT_METADATA_MAX_BYTES);
    assert_eq!(truncated.fields().next(), Some(("Name", "Negan")));
}

#[test]
fn stops_at_first_overflowing_field() {
    let truncated = truncate_metadata(&long_record(), DEFAULT_METADATA_MAX_BYTES);
    let keys: Vec<&str> = truncated.fields().map(|(k, _)| k).collect();

    // the third 15k field overflows; the short trivia after it is dropped too
    assert_eq!(keys, vec!["Name", "Overview[]", "Pre-Apocalypse[]"]);
    assert!(serialized_size(&truncated) <= DEFAULT_METADATA_MAX_BYTES);
}

#[test]
fn never_exceeds_ceiling() {
    let record = long_record();
    for ceiling in [2, 10, 100, 1_024, 15_050, 30_000, 40_000, 45_200, 100_000] {
        let truncated = truncate_metadata(&record, ceiling);
        let json = serde_json::to_vec(&truncated).expect("should serialize record");
        assert!(
            json.len() <= ceiling,
            "{} bytes over a ceiling of {}",
            json.len(),
            ceiling
        );
    }
}

#[test]
fn truncation_is_deterministic() {
    let record = long_record();
    assert_eq!(
        truncate_metadata(&record, 20_000),
        truncate_metadata(&record, 20_000)
    );
}

#[test]
fn tiny_ceiling_yields_empty_record() {
    assert!(truncate_metadata(&long_record(), 10).is_empty());
}

#[test]
fn second_name_key_is_kept_in_record_order() {
    let record = CharacterRecord::from_fields([
        ("Overview[]", "Leader of the Saviors."),
        ("Name", "Negan"),
        ("Trivia[]", "Carries Lucille."),
        ("Name[]", "Negan Smith"),
    ]);

    let truncated = truncate_metadata(&record, DEFAULT_METADATA_MAX_BYTES);
    let fields: Vec<(&str, &str)> = truncated.fields().collect();

    assert_eq!(
        fields,
        vec![
            ("Name", "Negan"),
            ("Overview[]", "Leader of the Saviors."),
            ("Trivia[]", "Carries Lucille."),
            ("Name[]", "Negan Smith"),
        ]
    );
    assert_eq!(serialized_size(&truncated), serialized_size(&record));
}
