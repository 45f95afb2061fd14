//! ISO base media file format (MP4, MOV, M4A) box walking.

use crate::sniff::{be_u32, be_u64};
use std::ops::Range;

struct BoxHeader<'a> {
    kind: &'a [u8],
    body: Range<usize>,
}

/// Child boxes laid out inside `range`.
fn boxes(data: &[u8], range: Range<usize>) -> Vec<BoxHeader<'_>> {
    let mut out = Vec::new();
    let mut at = range.start;
    while at + 8 <= range.end {
        let Some(size) = be_u32(data, at) else {
            break;
        };
        let (header, size) = match size {
            0 => (8, (range.end - at) as u64),
            1 => match be_u64(data, at + 8) {
                Some(large) => (16, large),
                None => break,
            },
            n => (8, u64::from(n)),
        };
        let Some(end) = usize::try_from(size).ok().and_then(|s| at.checked_add(s)) else {
            break;
        };
        if size < header as u64 || end > range.end {
            break;
        }
        out.push(BoxHeader {
            kind: &data[at + 4..at + 8],
            body: at + header..end,
        });
        at = end;
    }
    out
}

/// Fields read from the `ftyp` and `moov` boxes.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct MovieSummary {
    pub(crate) brand: String,
    pub(crate) duration_secs: Option<f64>,
    pub(crate) width: Option<u32>,
    pub(crate) height: Option<u32>,
    pub(crate) has_video: bool,
    pub(crate) has_audio: bool,
}

/// Whether the payload starts with an `ftyp` box.
pub(crate) fn is_bmff(data: &[u8]) -> bool {
    data.get(4..8) == Some(&b"ftyp"[..])
}

pub(crate) fn summarize(data: &[u8]) -> Option<MovieSummary> {
    if !is_bmff(data) {
        return None;
    }
    let mut summary = MovieSummary::default();
    for top in boxes(data, 0..data.len()) {
        match top.kind {
            b"ftyp" => {
                summary.brand = data
                    .get(top.body.start..top.body.start + 4)
                    .map(|b| String::from_utf8_lossy(b).trim().to_string())
                    .unwrap_or_default();
            }
            b"moov" => read_movie(data, top.body, &mut summary),
            _ => {}
        }
    }
    Some(summary)
}

fn read_movie(data: &[u8], range: Range<usize>, summary: &mut MovieSummary) {
    for child in boxes(data, range) {
        match child.kind {
            b"mvhd" => {
                let at = child.body.start;
                let (timescale, duration) = match data.get(at) {
                    Some(1) => (be_u32(data, at + 20), be_u64(data, at + 24)),
                    _ => (be_u32(data, at + 12), be_u32(data, at + 16).map(u64::from)),
                };
                if let (Some(scale), Some(duration)) = (timescale, duration)
                    && scale > 0
                {
                    summary.duration_secs = Some(duration as f64 / f64::from(scale));
                }
            }
            b"trak" => read_track(data, child.body, summary),
            _ => {}
        }
    }
}

fn read_track(data: &[u8], range: Range<usize>, summary: &mut MovieSummary) {
    let mut size = None;
    let mut handler = None;
    for child in boxes(data, range) {
        match child.kind {
            // Width and height are the last two 16.16 fixed-point fields
            b"tkhd" if child.body.len() >= 8 => {
                let end = child.body.end;
                size = be_u32(data, end - 8)
                    .zip(be_u32(data, end - 4))
                    .map(|(w, h)| (w >> 16, h >> 16));
            }
            b"mdia" => {
                handler = boxes(data, child.body)
                    .into_iter()
                    .find(|b| b.kind == b"hdlr")
                    .and_then(|hdlr| data.get(hdlr.body.start + 8..hdlr.body.start + 12));
            }
            _ => {}
        }
    }
    match handler {
        Some(b"vide") => {
            summary.has_video = true;
            if let Some((w, h)) = size.filter(|(w, h)| *w > 0 && *h > 0)
                && summary.width.is_none()
            {
                summary.width = Some(w);
                summary.height = Some(h);
            }
        }
        Some(b"soun") => summary.has_audio = true,
        _ => {}
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::mp4_box;
    use super::*;

    #[test]
    fn test_summary_reads_duration_and_track() {
        let mut mvhd = vec![0u8; 20];
        mvhd[12..16].copy_from_slice(&1000u32.to_be_bytes());
        mvhd[16..20].copy_from_slice(&2500u32.to_be_bytes());

        let mut tkhd = vec![0u8; 84];
        tkhd[76..80].copy_from_slice(&(320u32 << 16).to_be_bytes());
        tkhd[80..84].copy_from_slice(&(240u32 << 16).to_be_bytes());
        let mut hdlr = vec![0u8; 12];
        hdlr[8..12].copy_from_slice(b"vide");
        let mdia = mp4_box(b"mdia", &mp4_box(b"hdlr", &hdlr));
        let trak = mp4_box(b"trak", &[mp4_box(b"tkhd", &tkhd), mdia].concat());

        let mut data = mp4_box(b"ftyp", b"isom\0\0\0\0");
        data.extend(mp4_box(b"moov", &[mp4_box(b"mvhd", &mvhd), trak].concat()));

        let summary = summarize(&data).unwrap();
        assert_eq!(summary.brand, "isom");
        assert_eq!(summary.duration_secs, Some(2.5));
        assert_eq!(summary.width, Some(320));
        assert_eq!(summary.height, Some(240));
        assert!(summary.has_video);
        assert!(!summary.has_audio);
    }
}
