//! 🪣 The buffer: a FIFO of documents with a ceiling and a grudge.
//!
//! 🧠 Knowledge graph:
//! - `push_bounded`: at the limit, the *new* doc is refused. Existing work wins.
//! - `take_all`: swap the whole buffer for an empty one. What was taken is the batch.
//! - `requeue_front`: a failed batch goes back in front of whatever arrived
//!   meanwhile. If that overflows the limit, the *newest* arrivals are cut.
//!   The failed batch itself is never trimmed here.

use std::mem;

use crate::common::BufferedDoc;

#[derive(Debug, Default)]
pub(crate) struct DocBuffer {
    docs: Vec<BufferedDoc>,
}

impl DocBuffer {
    pub(crate) fn len(&self) -> usize {
        self.docs.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub(crate) fn snapshot(&self) -> Vec<BufferedDoc> {
        self.docs.clone()
    }

    /// 📥 Append at the back, unless the buffer is already at `limit`.
    ///
    /// Hands the doc back on refusal, so the caller can count the casualty.
    pub(crate) fn push_bounded(
        &mut self,
        doc: BufferedDoc,
        limit: Option<usize>,
    ) -> Result<(), BufferedDoc> {
        match limit {
            Some(limit) if self.docs.len() >= limit => Err(doc),
            _ => {
                self.docs.push(doc);
                Ok(())
            }
        }
    }

    /// 🔄 Detach everything. The buffer left behind is empty and ready for new arrivals.
    pub(crate) fn take_all(&mut self) -> Vec<BufferedDoc> {
        mem::take(&mut self.docs)
    }

    /// ↩️ Put a failed batch back at the front. Returns how many buffered docs got cut.
    ///
    /// With `current + failed >= limit`, the result is the whole failed batch
    /// followed by the oldest `limit - failed` of the current docs.
    pub(crate) fn requeue_front(&mut self, failed: Vec<BufferedDoc>, limit: Option<usize>) -> usize {
        let current = mem::take(&mut self.docs);
        let keep = match limit {
            Some(limit) if current.len() + failed.len() >= limit => {
                limit.saturating_sub(failed.len()).min(current.len())
            }
            _ => current.len(),
        };
        let discarded = current.len() - keep;

        self.docs = failed;
        self.docs.extend(current.into_iter().take(keep));
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(name: &str) -> BufferedDoc {
        BufferedDoc::new("idx", "", json!({ "name": name }))
    }

    fn names(buffer: &DocBuffer) -> Vec<String> {
        buffer
            .snapshot()
            .iter()
            .map(|d| d.payload["name"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn buffer_of(items: &[&str]) -> DocBuffer {
        let mut buffer = DocBuffer::default();
        for item in items {
            buffer
                .push_bounded(doc(item), None)
                .expect("💀 unbounded push cannot refuse");
        }
        buffer
    }

    #[test]
    fn the_one_where_the_velvet_rope_goes_up_at_the_limit() {
        let mut buffer = buffer_of(&["a", "b"]);

        let refused = buffer.push_bounded(doc("c"), Some(2));

        assert_eq!(refused, Err(doc("c")), "newcomer gets turned away");
        assert_eq!(names(&buffer), vec!["a", "b"], "regulars keep their seats");
    }

    #[test]
    fn the_one_where_no_limit_means_no_bouncer() {
        let mut buffer = DocBuffer::default();
        for i in 0..1000 {
            assert!(buffer.push_bounded(doc(&i.to_string()), None).is_ok());
        }
        assert_eq!(buffer.len(), 1000);
    }

    #[test]
    fn the_one_where_take_all_leaves_an_empty_room() {
        let mut buffer = buffer_of(&["a", "b", "c"]);

        let batch = buffer.take_all();

        assert_eq!(batch, vec![doc("a"), doc("b"), doc("c")]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn the_one_where_the_failed_batch_cuts_in_line_and_the_newest_get_bumped() {
        let mut buffer = buffer_of(&["a", "b", "c"]);

        let discarded = buffer.requeue_front(vec![doc("x"), doc("y")], Some(4));

        assert_eq!(names(&buffer), vec!["x", "y", "a", "b"]);
        assert_eq!(discarded, 1, "c was the newest, c goes");
    }

    #[test]
    fn the_one_where_there_is_room_for_everybody() {
        let mut buffer = buffer_of(&["a"]);

        let discarded = buffer.requeue_front(vec![doc("x"), doc("y")], Some(10));

        assert_eq!(names(&buffer), vec!["x", "y", "a"]);
        assert_eq!(discarded, 0);
    }

    #[test]
    fn the_one_where_exactly_full_still_keeps_everyone() {
        let mut buffer = buffer_of(&["a", "b"]);

        let discarded = buffer.requeue_front(vec![doc("x"), doc("y")], Some(4));

        assert_eq!(names(&buffer), vec!["x", "y", "a", "b"]);
        assert_eq!(discarded, 0);
    }

    #[test]
    fn the_one_where_the_failed_batch_alone_fills_the_room() {
        let mut buffer = buffer_of(&["a", "b"]);

        let discarded = buffer.requeue_front(vec![doc("x"), doc("y")], Some(2));

        assert_eq!(names(&buffer), vec!["x", "y"]);
        assert_eq!(discarded, 2);
    }

    #[test]
    fn the_one_where_unbounded_requeue_just_prepends() {
        let mut buffer = buffer_of(&["a", "b", "c"]);

        let discarded = buffer.requeue_front(vec![doc("x")], None);

        assert_eq!(names(&buffer), vec!["x", "a", "b", "c"]);
        assert_eq!(discarded, 0);
    }
}
