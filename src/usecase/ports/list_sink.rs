use crate::domain::entities::row::Row;

/// Consumer of a paginated list. Called only from the thread that pumps the
/// controller, in delivery order.
pub trait ListSink {
    /// The list is about to be refilled for a new query.
    fn on_reset(&mut self) {}

    fn on_batch(&mut self, rows: Vec<Row>);

    fn on_finished(&mut self, total_for_page: usize);

    fn on_error(&mut self, message: &str);
}

impl<S: ListSink + ?Sized> ListSink for Box<S> {
    fn on_reset(&mut self) {
        (**self).on_reset()
    }

    fn on_batch(&mut self, rows: Vec<Row>) {
        (**self).on_batch(rows)
    }

    fn on_finished(&mut self, total_for_page: usize) {
        (**self).on_finished(total_for_page)
    }

    fn on_error(&mut self, message: &str) {
        (**self).on_error(message)
    }
}
