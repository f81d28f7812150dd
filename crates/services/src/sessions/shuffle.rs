use rand::Rng;
use rand::seq::SliceRandom;

use quiz_core::model::{OptionView, QuestionSource, SessionQuestion};

/// Randomises presentation order without losing track of correct answers.
///
/// Options are shuffled as `(text, original_index)` pairs and the correct
/// index is copied from the source, so correctness never depends on position.
pub struct AnswerShuffler;

impl AnswerShuffler {
    /// Shuffle using the thread-local RNG.
    #[must_use]
    pub fn shuffle(questions: &[QuestionSource]) -> Vec<SessionQuestion> {
        Self::shuffle_with(questions, &mut rand::rng())
    }

    /// Shuffle question order, then each question's options independently.
    ///
    /// `SliceRandom::shuffle` is a Fisher-Yates shuffle, so every permutation
    /// is equally likely.
    pub fn shuffle_with<R: Rng + ?Sized>(
        questions: &[QuestionSource],
        rng: &mut R,
    ) -> Vec<SessionQuestion> {
        let mut order: Vec<&QuestionSource> = questions.iter().collect();
        order.shuffle(rng);

        order
            .into_iter()
            .map(|source| {
                let mut options: Vec<OptionView> = source
                    .options
                    .iter()
                    .enumerate()
                    .map(|(original_index, text)| OptionView {
                        text: text.clone(),
                        original_index,
                    })
                    .collect();
                options.shuffle(rng);
                SessionQuestion::new(source.prompt.clone(), options, source.correct)
            })
            .collect()
    }
}
