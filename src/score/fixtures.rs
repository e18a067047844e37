//! Score documents shared by unit tests

use std::sync::Arc;

use super::{parse_musicxml, Score};

/// 4/4 single-part score, one quarter note per pitch.
///
/// Each measure is `(label, [(step, octave)])`.
pub(crate) fn score_xml(measures: &[(&str, &[(char, i8)])]) -> String {
    let mut xml = String::from("<score-partwise version=\"4.0\"><part-list><score-part id=\"P1\"><part-name>Melody</part-name></score-part></part-list><part id=\"P1\">");
    for (i, (label, notes)) in measures.iter().enumerate() {
        xml.push_str(&format!("<measure number=\"{}\">", label));
        if i == 0 {
            xml.push_str("<attributes><divisions>1</divisions><time><beats>4</beats><beat-type>4</beat-type></time></attributes>");
        }
        for (step, octave) in notes.iter() {
            xml.push_str(&format!(
                "<note><pitch><step>{}</step><octave>{}</octave></pitch><duration>1</duration><voice>1</voice></note>",
                step, octave
            ));
        }
        xml.push_str("</measure>");
    }
    xml.push_str("</part></score-partwise>");
    xml
}

/// Score with the given labels where every measure holds four Cs in `octave`.
///
/// Different octaves give label-compatible scores with different content.
pub(crate) fn ladder(labels: &[&str], octave: i8) -> Arc<Score> {
    let notes = [('C', octave); 4];
    let measures: Vec<(&str, &[(char, i8)])> =
        labels.iter().map(|l| (*l, &notes[..])).collect();
    Arc::new(parse_musicxml(&score_xml(&measures)).unwrap())
}
