use std::sync::Arc;

use super::fixtures::{ladder, score_xml};
use super::*;
use crate::error::EtudeError;

const TWO_VOICES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<score-partwise version="4.0">
  <work><work-title>Minuet &amp; Trio</work-title></work>
  <part-list>
    <score-part id="P1"><part-name>Piano</part-name></score-part>
  </part-list>
  <part id="P1">
    <measure number="0">
      <attributes>
        <divisions>2</divisions>
        <time><beats>1</beats><beat-type>4</beat-type></time>
      </attributes>
      <direction><sound tempo="96"/></direction>
      <note><pitch><step>G</step><octave>4</octave></pitch><duration>2</duration><voice>1</voice></note>
    </measure>
    <measure number="1">
      <attributes><time><beats>3</beats><beat-type>4</beat-type></time></attributes>
      <note><pitch><step>C</step><octave>5</octave></pitch><duration>4</duration><voice>1</voice></note>
      <note><chord/><pitch><step>E</step><octave>5</octave></pitch><duration>4</duration><voice>1</voice></note>
      <note><pitch><step>F</step><alter>1</alter><octave>4</octave></pitch><duration>1</duration><voice>1</voice></note>
      <note><rest/><duration>1</duration><voice>1</voice></note>
      <backup><duration>6</duration></backup>
      <note><pitch><step>C</step><octave>3</octave></pitch><duration>6</duration><voice>2</voice></note>
    </measure>
    <measure number="1a">
      <note><rest/><duration>6</duration><voice>1</voice></note>
    </measure>
  </part>
</score-partwise>"#;

#[test]
fn test_parse_labels_and_metadata() {
    let result = parse_musicxml(TWO_VOICES);
    assert!(result.is_ok());
    let score = result.unwrap();

    assert_eq!(score.title.as_deref(), Some("Minuet & Trio"));
    assert_eq!(score.tempo, Some(96.0));
    assert_eq!(score.parts[0].name.as_deref(), Some("Piano"));
    assert_eq!(
        score.labels(),
        vec![MeasureLabel::from("0"), MeasureLabel::from("1"), MeasureLabel::from("1a")]
    );
    assert_eq!(score.measure_index(&MeasureLabel::from("1a")), Some(2));
}

#[test]
fn test_parse_durations_and_time_signatures() {
    let score = parse_musicxml(TWO_VOICES).unwrap();
    let measures = &score.parts[0].measures;

    // Pickup: 1/4 bar, one quarter note
    assert_eq!(measures[0].nominal_duration, Some(Fraction::new(1, 4)));
    assert_eq!(measures[0].entries[0].notes[0].duration, Fraction::new(1, 4));

    // 3/4 declared in measure 1 carries over to 1a without being redeclared
    assert_eq!(measures[1].time, Some(TimeSignature::new(3, 4)));
    assert_eq!(measures[2].time, None);
    assert_eq!(measures[2].nominal_duration, Some(Fraction::new(3, 4)));
}

#[test]
fn test_parse_chords_rests_and_backup() {
    let score = parse_musicxml(TWO_VOICES).unwrap();
    let entries = &score.parts[0].measures[1].entries;

    // Sorted by offset, then voice: chord(v1)@0, bass(v2)@0, F#@1/2, rest@5/8
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0].voice, 1);
    assert_eq!(entries[0].notes.len(), 2);
    assert_eq!(entries[0].notes[1].pitch.unwrap().index(), 76); // E5
    assert_eq!(entries[1].voice, 2);
    assert_eq!(entries[1].offset, Fraction::ZERO);
    assert_eq!(entries[1].notes[0].duration, Fraction::new(3, 4));
    assert_eq!(entries[2].offset, Fraction::new(1, 2));
    assert_eq!(entries[2].notes[0].pitch.unwrap().index(), 66); // F#4
    assert_eq!(entries[3].offset, Fraction::new(5, 8));
    assert!(entries[3].notes[0].is_rest());
}

#[test]
fn test_parse_rejects_measure_without_number() {
    let xml = r#"<score-partwise><part id="P1"><measure><note><rest/><duration>1</duration></note></measure></part></score-partwise>"#;
    let result = parse_musicxml(xml);
    assert!(matches!(result, Err(EtudeError::MusicXmlError { .. })));
}

#[test]
fn test_parse_rejects_malformed_xml() {
    let xml = r#"<score-partwise><part id="P1"><measure number="1"></part></score-partwise>"#;
    let result = parse_musicxml(xml);
    assert!(matches!(result, Err(EtudeError::MusicXmlError { .. })));
}

#[test]
fn test_parse_rejects_empty_score() {
    let result = parse_musicxml(r#"<score-partwise><part id="P1"></part></score-partwise>"#);
    assert!(matches!(result, Err(EtudeError::EmptyScore)));
}

#[test]
fn test_parse_rejects_duplicate_labels() {
    let notes = [('C', 4)];
    let xml = score_xml(&[("1", &notes[..]), ("2", &notes[..]), ("1", &notes[..])]);
    match parse_musicxml(&xml) {
        Err(EtudeError::LabelError { label, .. }) => assert_eq!(label, "1"),
        other => panic!("expected LabelError, got {:?}", other),
    }
}

#[test]
fn test_parse_rejects_misaligned_parts() {
    let xml = r#"<score-partwise>
      <part id="P1"><measure number="1"/><measure number="2"/></part>
      <part id="P2"><measure number="1"/><measure number="3"/></part>
    </score-partwise>"#;
    let result = parse_musicxml(xml);
    assert!(matches!(result, Err(EtudeError::LabelError { .. })));
}

#[test]
fn test_written_score_reads_back_identically() {
    let score = parse_musicxml(TWO_VOICES).unwrap();
    let xml = to_musicxml(&score);

    assert!(xml.contains("<measure number=\"1a\">"));
    assert!(xml.contains("<work-title>Minuet &amp; Trio</work-title>"));
    assert!(xml.contains("<chord/>"));
    assert!(xml.contains("<backup>"));

    let reparsed = parse_musicxml(&xml).unwrap();
    assert_eq!(reparsed, score);
}

#[test]
fn test_parse_rejects_out_of_range_divisions() {
    let xml = r#"<score-partwise><part id="P1"><measure number="1">
      <attributes><divisions>1500000000</divisions></attributes>
      <note><pitch><step>C</step><octave>4</octave></pitch><duration>1500000000</duration></note>
    </measure></part></score-partwise>"#;
    let result = parse_musicxml(xml);
    match result {
        Err(EtudeError::MusicXmlError { message, .. }) => assert!(message.contains("divisions")),
        other => panic!("expected MusicXmlError, got {:?}", other),
    }
}

#[test]
fn test_parse_accepts_largest_divisions() {
    let xml = r#"<score-partwise><part id="P1"><measure number="1">
      <attributes><divisions>1073741823</divisions></attributes>
      <note><pitch><step>C</step><octave>4</octave></pitch><duration>1073741823</duration></note>
    </measure></part></score-partwise>"#;
    let score = parse_musicxml(xml).unwrap();
    assert_eq!(score.parts[0].measures[0].entries[0].notes[0].duration, Fraction::new(1, 4));
}

#[test]
fn test_write_rounds_durations_too_fine_for_divisions() {
    // Pairwise coprime denominators: their lcm does not fit in a u64
    let notes = [1_000_000_007u32, 998_244_353, 999_999_937]
        .iter()
        .enumerate()
        .map(|(i, den)| {
            VoiceEntry::new(
                i as u8 + 1,
                Fraction::ZERO,
                vec![Note::pitched(Pitch::new('C', 0, 4), Fraction::new(1, *den))],
            )
        })
        .collect();
    let mut measure = Measure::new("1");
    measure.entries = notes;
    let mut part = Part::new("P1");
    part.measures.push(measure);
    let score = Score::new(vec![part]);

    let xml = to_musicxml(&score);
    assert!(xml.contains("<divisions>256</divisions>"));
    assert!(!xml.contains("<grace/>"));

    let reparsed = parse_musicxml(&xml).unwrap();
    let entries = &reparsed.parts[0].measures[0].entries;
    assert_eq!(entries.len(), 3);
    // Each note keeps the smallest grid step rather than vanishing
    assert!(entries
        .iter()
        .all(|e| e.notes[0].duration == Fraction::new(1, 1024)));
}

#[test]
fn test_fraction_arithmetic() {
    let third = Fraction::new(1, 3);
    let sixth = Fraction::new(2, 12);
    assert_eq!(sixth, Fraction::new(1, 6));
    assert_eq!(third + sixth, Fraction::new(1, 2));
    assert_eq!(sixth - third, Fraction::ZERO);
    assert!(sixth < third);
    assert_eq!(Fraction::new(3, 0), Fraction::ZERO);
    assert_eq!(Fraction::new(3, 4).to_string(), "3/4");
}

#[test]
fn test_walker_visits_every_onset_in_order() {
    let score = Arc::new(parse_musicxml(TWO_VOICES).unwrap());
    let mut walker = ScoreWalker::new(score).unwrap();

    let mut visited = Vec::new();
    while !walker.at_end() {
        let position = walker.position().unwrap();
        visited.push((position.label.to_string(), position.timestamp));
        walker.advance();
    }

    assert_eq!(
        visited,
        vec![
            ("0".to_string(), Fraction::ZERO),
            ("1".to_string(), Fraction::new(1, 4)),
            ("1".to_string(), Fraction::new(3, 4)),
            ("1".to_string(), Fraction::new(7, 8)),
            ("1a".to_string(), Fraction::new(1, 1)),
        ]
    );

    // Stays put once finished
    walker.advance();
    assert!(walker.at_end());
    assert_eq!(walker.current_measure_label(), None);
    assert!(walker.current_voice_entries().is_empty());
}

#[test]
fn test_walker_reads_simultaneous_voices() {
    let score = Arc::new(parse_musicxml(TWO_VOICES).unwrap());
    let mut walker = ScoreWalker::new(score).unwrap();
    walker.advance();

    let entries = walker.current_voice_entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(walker.current_measure_duration(), Some(Fraction::new(3, 4)));

    walker.reset();
    assert_eq!(walker.current_measure_label(), Some(MeasureLabel::from("0")));
}

#[test]
fn test_walker_empty_measure_takes_one_step() {
    let xml = r#"<score-partwise><part id="P1">
      <measure number="1"><attributes><divisions>1</divisions><time><beats>2</beats><beat-type>4</beat-type></time></attributes></measure>
      <measure number="2"/>
    </part></score-partwise>"#;
    let score = Arc::new(parse_musicxml(xml).unwrap());
    let mut walker = ScoreWalker::new(score).unwrap();

    assert!(walker.current_voice_entries().is_empty());
    assert_eq!(walker.current_measure_duration(), Some(Fraction::new(1, 2)));
    walker.advance();
    assert_eq!(walker.current_measure_label(), Some(MeasureLabel::from("2")));
    walker.advance();
    assert!(walker.at_end());
}

#[test]
fn test_walker_rejects_empty_score() {
    let result = ScoreWalker::new(Arc::new(Score::new(Vec::new())));
    assert!(matches!(result, Err(EtudeError::EmptyScore)));
}

#[test]
fn test_walker_reload_keeps_position() {
    let labels = ["1", "2", "3"];
    let mut walker = ScoreWalker::new(ladder(&labels, 4)).unwrap();
    for _ in 0..5 {
        walker.advance();
    }
    let before = walker.position().unwrap();
    assert_eq!(before.label, MeasureLabel::from("2"));
    assert_eq!(before.entry_index, 1);

    walker.reload(ladder(&labels, 5));
    assert_eq!(walker.position().unwrap(), before);
    let entries = walker.current_voice_entries();
    assert_eq!(entries[0].notes[0].pitch.unwrap().octave, 5);
}
