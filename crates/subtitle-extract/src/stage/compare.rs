use std::collections::BTreeMap;
use std::sync::Arc;

use subtitle_extract_ocr::{OcrEngine, OcrError, OcrResponse};
use subtitle_extract_types::{Coordinate, LumaFrame};
use tracing::warn;

use super::recognize_ranked;
use crate::similarity::is_similar;

/// Recognition of one frame, kept while it may still be compared or handed to the consumer.
#[derive(Debug, Clone)]
pub struct CachedRecognition {
    /// Text inside the subtitle area, lines concatenated in reading order.
    pub text: String,
    pub response: OcrResponse,
}

/// Decides whether two frames show the same subtitle line, recognizing each
/// frame at most once while it stays cached.
///
/// After every comparison of frames `lo <= hi` only entries within `window`
/// frames before `lo` or before `hi` survive, so the cache never holds more
/// than `2 * window + 2` frames during a forward scan.
pub struct OcrComparator {
    engine: Arc<dyn OcrEngine>,
    area: Option<Coordinate>,
    threshold: f64,
    window: u64,
    cache: BTreeMap<u64, CachedRecognition>,
}

impl OcrComparator {
    pub fn new(
        engine: Arc<dyn OcrEngine>,
        area: Option<Coordinate>,
        threshold: f64,
        window: u64,
    ) -> Self {
        Self {
            engine,
            area,
            threshold,
            window,
            cache: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn get(&self, frame_no: u64) -> Option<&CachedRecognition> {
        self.cache.get(&frame_no)
    }

    /// Recognizes `frame` unless `frame_no` is already cached.
    pub fn ensure(&mut self, frame_no: u64, frame: &LumaFrame) -> Result<&CachedRecognition, OcrError> {
        if !self.cache.contains_key(&frame_no) {
            let response = recognize_ranked(self.engine.as_ref(), frame)?;
            let text = area_text(&response, self.area);
            self.cache.insert(frame_no, CachedRecognition { text, response });
        }
        self.cache
            .get(&frame_no)
            .ok_or_else(|| OcrError::backend("recognition cache lost an entry"))
    }

    /// `true` when both frames read as the same line. A recognition failure
    /// on either side counts as different.
    pub fn similar(
        &mut self,
        first_no: u64,
        first: &LumaFrame,
        second_no: u64,
        second: &LumaFrame,
    ) -> bool {
        let threshold = self.threshold;
        let result = self
            .ensure(first_no, first)
            .map(|entry| entry.text.clone())
            .and_then(|first_text| {
                self.ensure(second_no, second)
                    .map(|entry| is_similar(&first_text, &entry.text, threshold))
            });
        self.evict(first_no.min(second_no), first_no.max(second_no));
        match result {
            Ok(similar) => similar,
            Err(err) => {
                warn!(first_no, second_no, error = %err, "comparison failed; treating frames as different");
                false
            }
        }
    }

    fn evict(&mut self, lo: u64, hi: u64) {
        let window = self.window;
        self.cache.retain(|&frame_no, _| {
            frame_no.saturating_add(window) >= lo
                && (frame_no <= lo || frame_no.saturating_add(window) >= hi)
        });
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

/// Concatenated text of the lines inside `area`, or of every line without one.
pub fn area_text(response: &OcrResponse, area: Option<Coordinate>) -> String {
    response
        .texts
        .iter()
        .filter(|line| area.is_none_or(|area| area.contains(&line.coordinate())))
        .map(|line| line.text.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use subtitle_extract_ocr::{OcrRequest, OcrText};
    use subtitle_extract_types::Quad;

    use super::*;

    /// Reads the text from a table keyed by frame index and counts calls.
    struct ScriptedEngine {
        texts: Vec<&'static str>,
        calls: AtomicUsize,
        fail_on: Option<u64>,
    }

    impl ScriptedEngine {
        fn new(texts: Vec<&'static str>) -> Self {
            Self {
                texts,
                calls: AtomicUsize::new(0),
                fail_on: None,
            }
        }
    }

    impl OcrEngine for ScriptedEngine {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn recognize(&self, request: &OcrRequest<'_>) -> Result<OcrResponse, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let index = request.frame_index().unwrap_or_default();
            if self.fail_on == Some(index) {
                return Err(OcrError::backend("scripted failure"));
            }
            let text = self.texts.get(index as usize).copied().unwrap_or_default();
            if text.is_empty() {
                return Ok(OcrResponse::empty());
            }
            let quad = Quad::from_coordinate(&Coordinate::new(100, 500, 900, 950));
            Ok(OcrResponse::new(vec![OcrText::new(quad, text, 0.99)]))
        }
    }

    fn frame(index: u64) -> LumaFrame {
        LumaFrame::new(2, 2, vec![0; 4])
            .unwrap()
            .with_frame_index(Some(index))
    }

    #[test]
    fn compares_text_and_memoizes() {
        let engine = Arc::new(ScriptedEngine::new(vec!["Hello world", "Helloworld", "Bye"]));
        let mut comparator = OcrComparator::new(engine.clone(), None, 0.8, 10);
        assert!(comparator.similar(0, &frame(0), 1, &frame(1)));
        assert!(!comparator.similar(0, &frame(0), 2, &frame(2)));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 3);
        assert_eq!(comparator.get(2).unwrap().text, "Bye");
    }

    #[test]
    fn failures_count_as_different() {
        let mut engine = ScriptedEngine::new(vec!["a", "a"]);
        engine.fail_on = Some(1);
        let mut comparator = OcrComparator::new(Arc::new(engine), None, 0.8, 10);
        assert!(!comparator.similar(0, &frame(0), 1, &frame(1)));
        assert!(comparator.get(0).is_some());
        assert!(comparator.get(1).is_none());
    }

    #[test]
    fn area_limits_the_compared_text() {
        let inside = OcrText::new(
            Quad::from_coordinate(&Coordinate::new(100, 500, 900, 950)),
            "Sub",
            0.9,
        );
        let outside = OcrText::new(
            Quad::from_coordinate(&Coordinate::new(900, 950, 10, 30)),
            "LOGO",
            0.9,
        );
        let response = OcrResponse::new(vec![outside, inside]);
        assert_eq!(area_text(&response, None), "LOGOSub");
        assert_eq!(
            area_text(&response, Some(Coordinate::new(0, 1920, 880, 1000))),
            "Sub"
        );
    }

    #[test]
    fn cache_stays_bounded_during_a_long_scan() {
        let window = 10;
        let texts: Vec<&'static str> = vec!["same line"; 500];
        let engine = Arc::new(ScriptedEngine::new(texts));
        let mut comparator = OcrComparator::new(engine, None, 0.8, window);
        let anchor = 3;
        for current in (anchor + 1)..500 {
            assert!(comparator.similar(anchor, &frame(anchor), current, &frame(current)));
            assert!(comparator.len() <= 2 * window as usize + 2);
        }
        assert!(comparator.get(anchor).is_some());
        assert!(comparator.get(499).is_some());
        assert!(comparator.get(200).is_none());
    }

    #[test]
    fn old_entries_fall_out_as_the_pair_advances() {
        let engine = Arc::new(ScriptedEngine::new(vec!["x"; 100]));
        let mut comparator = OcrComparator::new(engine, None, 0.8, 10);
        for start in 0..90u64 {
            comparator.similar(start, &frame(start), start + 1, &frame(start + 1));
            assert!(comparator.len() <= 22);
        }
        assert!(comparator.get(0).is_none());
        assert!(comparator.get(89).is_some());
    }
}
