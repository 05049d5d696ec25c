use indicatif::{ProgressBar, ProgressBarIter, ProgressIterator, ProgressStyle};

/// Wraps an iterator with a colored progress bar.
///
/// `COLOR` is one of `'b'` (blue), `'g'` (green) or `'r'` (red). The third field hides the bar.
pub struct NiceProgressBar<T: ExactSizeIterator, const COLOR: char = 'b'>(
    pub T,
    pub &'static str,
    pub bool,
);

impl<T: ExactSizeIterator, const COLOR: char> IntoIterator for NiceProgressBar<T, COLOR> {
    type IntoIter = ProgressBarIter<T>;
    type Item = T::Item;

    fn into_iter(self) -> Self::IntoIter {
        let Self(iter, message, silent) = self;
        if silent {
            return iter.progress_with(ProgressBar::hidden());
        }

        let color = match COLOR {
            'g' => "green",
            'r' => "red",
            _ => "blue",
        };
        let template = format!(
            "{{msg}} [{{elapsed_precise}}] [{{bar:40.{color}/{color}}}] {{pos}}/{{len}} ({{eta}})"
        );
        let bar = ProgressBar::new(iter.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(&template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message(message);
        iter.progress_with(bar)
    }
}
