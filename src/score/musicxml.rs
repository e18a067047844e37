//! MusicXML reading and writing
//!
//! Only the subset the engine needs: parts, labelled measures, divisions,
//! time signatures, notes/rests/chords per voice, `backup`/`forward` and the
//! tempo from `<sound tempo>`. Everything else is skipped on read and not
//! produced on write.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::types::*;
use crate::error::EtudeError;

/// Parse a `score-partwise` MusicXML document.
///
/// The result is validated (labels unique and aligned across parts, at least
/// one measure), so a returned score can always be walked.
pub fn parse_musicxml(xml: &str) -> Result<Score, EtudeError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut parser = ScoreParser::default();

    loop {
        let position = reader.buffer_position();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => parser.open(e, position)?,
            Ok(Event::Empty(ref e)) => {
                parser.open(e, position)?;
                parser.close(e.name().as_ref(), position)?;
            }
            Ok(Event::End(ref e)) => parser.close(e.name().as_ref(), position)?,
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(|err| EtudeError::MusicXmlError {
                    position,
                    message: err.to_string(),
                })?;
                parser.text(&text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(EtudeError::MusicXmlError {
                    position: reader.buffer_position(),
                    message: e.to_string(),
                })
            }
        }
        buf.clear();
    }

    parser.finish(reader.buffer_position())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Tag {
    Divisions,
    Beats,
    BeatType,
    Duration,
    Step,
    Alter,
    Octave,
    Voice,
    Title,
    PartName,
}

#[derive(Debug, Clone, Copy)]
enum Motion {
    Backup(u32),
    Forward(u32),
}

#[derive(Debug, Default)]
struct NoteBuilder {
    rest: bool,
    chord: bool,
    grace: bool,
    step: Option<char>,
    alter: i8,
    octave: Option<i8>,
    duration: u32,
    voice: Option<u8>,
}

#[derive(Debug)]
struct MeasureBuilder {
    measure: Measure,
    offset: Fraction,
    last_onset: Fraction,
}

#[derive(Debug, Default)]
struct ScoreParser {
    title: Option<String>,
    tempo: Option<f64>,
    parts: Vec<Part>,
    part_names: HashMap<String, String>,
    score_part_id: Option<String>,
    part: Option<Part>,
    measure: Option<MeasureBuilder>,
    note: Option<NoteBuilder>,
    motion: Option<Motion>,
    divisions: u32,
    /// Divisions per whole note
    whole: u32,
    time: Option<TimeSignature>,
    beats: Option<u8>,
    beat_type: Option<u8>,
    tag: Option<Tag>,
}

fn attribute(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| std::str::from_utf8(&a.value).ok().map(|s| s.to_string()))
}

impl ScoreParser {
    fn open(&mut self, e: &BytesStart, position: usize) -> Result<(), EtudeError> {
        match e.name().as_ref() {
            b"score-part" => self.score_part_id = attribute(e, b"id"),
            b"part" => {
                let id = attribute(e, b"id").unwrap_or_else(|| format!("P{}", self.parts.len() + 1));
                let mut part = Part::new(id.clone());
                part.name = self.part_names.get(&id).cloned();
                self.part = Some(part);
                self.divisions = 1;
                self.whole = 4;
                self.time = None;
            }
            b"measure" => {
                if self.part.is_none() {
                    return Err(EtudeError::MusicXmlError {
                        position,
                        message: "measure outside of a part".to_string(),
                    });
                }
                let label = attribute(e, b"number").ok_or_else(|| EtudeError::MusicXmlError {
                    position,
                    message: "measure without a number attribute".to_string(),
                })?;
                let mut measure = Measure::new(MeasureLabel::new(label));
                measure.nominal_duration = self.time.map(|t| t.measure_duration());
                self.measure = Some(MeasureBuilder {
                    measure,
                    offset: Fraction::ZERO,
                    last_onset: Fraction::ZERO,
                });
            }
            b"note" => self.note = Some(NoteBuilder::default()),
            b"rest" => {
                if let Some(note) = self.note.as_mut() {
                    note.rest = true;
                }
            }
            b"chord" => {
                if let Some(note) = self.note.as_mut() {
                    note.chord = true;
                }
            }
            b"grace" => {
                if let Some(note) = self.note.as_mut() {
                    note.grace = true;
                }
            }
            b"backup" => self.motion = Some(Motion::Backup(0)),
            b"forward" => self.motion = Some(Motion::Forward(0)),
            b"time" => {
                self.beats = None;
                self.beat_type = None;
            }
            b"sound" => {
                if self.tempo.is_none() {
                    if let Some(t) = attribute(e, b"tempo").and_then(|v| v.parse::<f64>().ok()) {
                        self.tempo = Some(t);
                    }
                }
            }
            b"divisions" => self.tag = Some(Tag::Divisions),
            b"beats" => self.tag = Some(Tag::Beats),
            b"beat-type" => self.tag = Some(Tag::BeatType),
            b"duration" => self.tag = Some(Tag::Duration),
            b"step" => self.tag = Some(Tag::Step),
            b"alter" => self.tag = Some(Tag::Alter),
            b"octave" => self.tag = Some(Tag::Octave),
            b"voice" => self.tag = Some(Tag::Voice),
            b"work-title" | b"movement-title" => self.tag = Some(Tag::Title),
            b"part-name" => self.tag = Some(Tag::PartName),
            _ => {}
        }
        Ok(())
    }

    fn text(&mut self, text: &str) {
        let Some(tag) = self.tag.take() else {
            return;
        };
        let text = text.trim();
        match tag {
            Tag::Divisions => {
                if let Ok(v) = text.parse::<u32>() {
                    if v > 0 {
                        self.divisions = v;
                    }
                }
            }
            Tag::Beats => self.beats = text.parse().ok(),
            Tag::BeatType => self.beat_type = text.parse().ok(),
            Tag::Duration => {
                let value = text.parse::<f64>().map(|v| v.max(0.0).round() as u32).unwrap_or(0);
                if let Some(note) = self.note.as_mut() {
                    note.duration = value;
                } else if let Some(motion) = self.motion.as_mut() {
                    *motion = match motion {
                        Motion::Backup(_) => Motion::Backup(value),
                        Motion::Forward(_) => Motion::Forward(value),
                    };
                }
            }
            Tag::Step => {
                if let Some(note) = self.note.as_mut() {
                    note.step = text.chars().next();
                }
            }
            Tag::Alter => {
                if let Some(note) = self.note.as_mut() {
                    note.alter = text.parse::<f64>().map(|v| v.round() as i8).unwrap_or(0);
                }
            }
            Tag::Octave => {
                if let Some(note) = self.note.as_mut() {
                    note.octave = text.parse().ok();
                }
            }
            Tag::Voice => {
                if let Some(note) = self.note.as_mut() {
                    note.voice = text.parse().ok();
                }
            }
            Tag::Title => {
                if self.title.is_none() && !text.is_empty() {
                    self.title = Some(text.to_string());
                }
            }
            Tag::PartName => {
                if let Some(id) = &self.score_part_id {
                    if !text.is_empty() {
                        self.part_names.insert(id.clone(), text.to_string());
                    }
                }
            }
        }
    }

    fn close(&mut self, name: &[u8], position: usize) -> Result<(), EtudeError> {
        self.tag = None;
        match name {
            b"note" => {
                if let Some(note) = self.note.take() {
                    self.finish_note(note);
                }
            }
            b"backup" | b"forward" => {
                if let (Some(motion), Some(m)) = (self.motion.take(), self.measure.as_mut()) {
                    let whole = self.whole;
                    m.offset = match motion {
                        Motion::Backup(d) => m.offset - Fraction::new(d, whole),
                        Motion::Forward(d) => m.offset + Fraction::new(d, whole),
                    };
                }
            }
            b"divisions" => {
                self.whole = self.divisions.checked_mul(4).ok_or_else(|| EtudeError::MusicXmlError {
                    position,
                    message: format!("divisions {} out of range", self.divisions),
                })?;
            }
            b"time" => {
                if let (Some(beats), Some(beat_type)) = (self.beats, self.beat_type) {
                    let time = TimeSignature::new(beats, beat_type);
                    self.time = Some(time);
                    if let Some(m) = self.measure.as_mut() {
                        m.measure.time = Some(time);
                        m.measure.nominal_duration = Some(time.measure_duration());
                    }
                }
            }
            b"measure" => {
                let Some(mut builder) = self.measure.take() else {
                    return Ok(());
                };
                builder
                    .measure
                    .entries
                    .sort_by(|a, b| a.offset.cmp(&b.offset).then(a.voice.cmp(&b.voice)));
                match self.part.as_mut() {
                    Some(part) => part.measures.push(builder.measure),
                    None => {
                        return Err(EtudeError::MusicXmlError {
                            position,
                            message: "measure closed outside of a part".to_string(),
                        })
                    }
                }
            }
            b"part" => {
                if let Some(part) = self.part.take() {
                    self.parts.push(part);
                }
            }
            b"score-part" => self.score_part_id = None,
            _ => {}
        }
        Ok(())
    }

    fn finish_note(&mut self, note: NoteBuilder) {
        let Some(m) = self.measure.as_mut() else {
            return;
        };
        let duration = if note.grace {
            Fraction::ZERO
        } else {
            Fraction::new(note.duration, self.whole)
        };
        let pitch = match (note.rest, note.step, note.octave) {
            (false, Some(step), Some(octave)) => Some(Pitch::new(step, note.alter, octave)),
            _ => None,
        };
        let voice = note.voice.unwrap_or(1);
        let built = Note { pitch, duration };

        if note.chord {
            let onset = m.last_onset;
            if let Some(entry) = m
                .measure
                .entries
                .iter_mut()
                .rev()
                .find(|e| e.voice == voice && e.offset == onset)
            {
                entry.notes.push(built);
                return;
            }
        }

        m.measure
            .entries
            .push(VoiceEntry::new(voice, m.offset, vec![built]));
        m.last_onset = m.offset;
        m.offset = m.offset + duration;
    }

    fn finish(self, position: usize) -> Result<Score, EtudeError> {
        if self.part.is_some() || self.measure.is_some() {
            return Err(EtudeError::MusicXmlError {
                position,
                message: "document ended inside a part".to_string(),
            });
        }
        let score = Score {
            title: self.title,
            tempo: self.tempo,
            parts: self.parts,
        };
        score.validate()?;
        Ok(score)
    }
}

/// Convert a Score to MusicXML format
pub fn to_musicxml(score: &Score) -> String {
    let divisions = divisions_for(score);
    let mut xml = String::new();

    // XML declaration and doctype
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    xml.push_str(r#"<!DOCTYPE score-partwise PUBLIC "-//Recordare//DTD MusicXML 4.0 Partwise//EN" "http://www.musicxml.org/dtds/partwise.dtd">"#);
    xml.push('\n');

    xml.push_str(r#"<score-partwise version="4.0">"#);
    xml.push('\n');

    if let Some(title) = &score.title {
        xml.push_str("  <work>\n");
        xml.push_str(&format!("    <work-title>{}</work-title>\n", escape_xml(title)));
        xml.push_str("  </work>\n");
    }

    // Part list
    xml.push_str("  <part-list>\n");
    for part in &score.parts {
        xml.push_str(&format!("    <score-part id=\"{}\">\n", escape_xml(&part.id)));
        xml.push_str(&format!(
            "      <part-name>{}</part-name>\n",
            escape_xml(part.name.as_deref().unwrap_or(""))
        ));
        xml.push_str("    </score-part>\n");
    }
    xml.push_str("  </part-list>\n");

    for part in &score.parts {
        xml.push_str(&format!("  <part id=\"{}\">\n", escape_xml(&part.id)));
        for (i, measure) in part.measures.iter().enumerate() {
            let tempo = if i == 0 { score.tempo } else { None };
            xml.push_str(&measure_to_xml(measure, divisions, i == 0, tempo));
        }
        xml.push_str("  </part>\n");
    }

    xml.push_str("</score-partwise>\n");
    xml
}

/// Largest `<divisions>` whose whole-note count still fits the reader's `u32`
const MAX_DIVISIONS: u64 = u32::MAX as u64 / 4;

/// Quarter-note grid used when exact divisions would exceed `MAX_DIVISIONS`
const FALLBACK_DIVISIONS: u64 = 256;

/// Smallest divisions-per-quarter that expresses every duration and offset
/// as an integer.
///
/// Scores whose durations need more than `MAX_DIVISIONS` are written on the
/// `FALLBACK_DIVISIONS` grid, rounding every duration to it.
fn divisions_for(score: &Score) -> u64 {
    let mut divisions = Some(1u64);
    let mut include = |f: Fraction| {
        if f.is_zero() {
            return;
        }
        let den = f.denominator() as u64;
        let needed = den / gcd(den, 4);
        divisions = divisions
            .and_then(|d| lcm(d, needed))
            .filter(|d| *d <= MAX_DIVISIONS);
    };
    for part in &score.parts {
        for measure in &part.measures {
            for entry in &measure.entries {
                include(entry.offset);
                for note in &entry.notes {
                    include(note.duration);
                }
            }
        }
    }
    divisions.unwrap_or_else(|| {
        log::warn!(
            "Durations too fine for MusicXML divisions, rounding to 1/{} of a quarter",
            FALLBACK_DIVISIONS
        );
        FALLBACK_DIVISIONS
    })
}

/// `f` in divisions, rounded to the nearest one. Non-zero durations keep at
/// least one division.
fn to_divisions(f: Fraction, divisions: u64) -> u64 {
    if f.is_zero() {
        return 0;
    }
    let scaled = f.numerator() as u128 * 4 * divisions as u128;
    let den = f.denominator() as u128;
    let rounded = (scaled + den / 2) / den;
    rounded.clamp(1, u32::MAX as u128) as u64
}

fn measure_to_xml(
    measure: &Measure,
    divisions: u64,
    include_divisions: bool,
    tempo: Option<f64>,
) -> String {
    let mut xml = String::new();
    xml.push_str(&format!("    <measure number=\"{}\">\n", escape_xml(measure.label.as_str())));

    if include_divisions || measure.time.is_some() {
        xml.push_str("      <attributes>\n");
        if include_divisions {
            xml.push_str(&format!("        <divisions>{}</divisions>\n", divisions));
        }
        if let Some(time) = measure.time {
            xml.push_str("        <time>\n");
            xml.push_str(&format!("          <beats>{}</beats>\n", time.beats));
            xml.push_str(&format!("          <beat-type>{}</beat-type>\n", time.beat_type));
            xml.push_str("        </time>\n");
        }
        xml.push_str("      </attributes>\n");
    }

    if let Some(bpm) = tempo {
        xml.push_str("      <direction placement=\"above\">\n");
        xml.push_str(&format!("        <sound tempo=\"{}\"/>\n", bpm));
        xml.push_str("      </direction>\n");
    }

    // Voice by voice, moving the writing position with backup/forward
    let mut entries: Vec<&VoiceEntry> = measure.entries.iter().collect();
    entries.sort_by(|a, b| a.voice.cmp(&b.voice).then(a.offset.cmp(&b.offset)));

    let mut position = Fraction::ZERO;
    for entry in entries {
        if entry.offset < position {
            xml.push_str("      <backup>\n");
            xml.push_str(&format!(
                "        <duration>{}</duration>\n",
                to_divisions(position - entry.offset, divisions)
            ));
            xml.push_str("      </backup>\n");
        } else if entry.offset > position {
            xml.push_str("      <forward>\n");
            xml.push_str(&format!(
                "        <duration>{}</duration>\n",
                to_divisions(entry.offset - position, divisions)
            ));
            xml.push_str("      </forward>\n");
        }

        for (i, note) in entry.notes.iter().enumerate() {
            xml.push_str(&note_to_xml(note, entry.voice, i > 0, divisions));
        }
        position = entry.offset + entry.notes.first().map_or(Fraction::ZERO, |n| n.duration);
    }

    xml.push_str("    </measure>\n");
    xml
}

fn note_to_xml(note: &Note, voice: u8, chord: bool, divisions: u64) -> String {
    let mut xml = String::new();
    xml.push_str("      <note>\n");

    let grace = note.duration.is_zero() && note.pitch.is_some();
    if grace {
        xml.push_str("        <grace/>\n");
    }
    if chord {
        xml.push_str("        <chord/>\n");
    }

    match note.pitch {
        Some(pitch) => {
            xml.push_str("        <pitch>\n");
            xml.push_str(&format!("          <step>{}</step>\n", pitch.step));
            if pitch.alter != 0 {
                xml.push_str(&format!("          <alter>{}</alter>\n", pitch.alter));
            }
            xml.push_str(&format!("          <octave>{}</octave>\n", pitch.octave));
            xml.push_str("        </pitch>\n");
        }
        None => xml.push_str("        <rest/>\n"),
    }

    if !grace {
        xml.push_str(&format!(
            "        <duration>{}</duration>\n",
            to_divisions(note.duration, divisions)
        ));
    }
    xml.push_str(&format!("        <voice>{}</voice>\n", voice));
    xml.push_str("      </note>\n");
    xml
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
