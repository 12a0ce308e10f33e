use crate::models::{review_interval, ReviewRecommendation, REVIEW_STAGE_MAX};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Pure spaced-repetition transitions over one (user, question)
/// recommendation. Persistence and the per-row update scope live behind
/// the store; these functions only compute the next state.
///
/// Stage intervals: 1 day, 7 days, 16 days, 35 days.
pub struct ReviewScheduler;

impl ReviewScheduler {
    /// Incorrect exam attempt with no open recommendation: open one at
    /// stage 1, due in exactly one day.
    pub fn open(user_id: Uuid, question_id: Uuid, now: DateTime<Utc>) -> ReviewRecommendation {
        ReviewRecommendation {
            id: Uuid::new_v4(),
            user_id,
            question_id,
            review_stage: 1,
            last_reviewed_at: None,
            next_review_at: now + review_interval(1),
            completed: false,
            updated_at: now,
        }
    }

    /// Incorrect exam attempt while a recommendation is already open: the
    /// stage does not advance and the interval does not shrink; the clock
    /// re-bases from now at the current stage.
    pub fn repeat_incorrect(recommendation: &mut ReviewRecommendation, now: DateTime<Utc>) {
        recommendation.next_review_at = now + review_interval(recommendation.review_stage);
        recommendation.updated_at = now;
    }

    /// Explicit review completion. Correct advances the stage (capped at
    /// 4); incorrect resets to stage 1.
    pub fn complete(
        recommendation: &mut ReviewRecommendation,
        was_correct: bool,
        now: DateTime<Utc>,
    ) {
        recommendation.review_stage = if was_correct {
            (recommendation.review_stage + 1).min(REVIEW_STAGE_MAX)
        } else {
            1
        };
        recommendation.last_reviewed_at = Some(now);
        recommendation.next_review_at = now + review_interval(recommendation.review_stage);
        recommendation.updated_at = now;
    }

    /// Learner opted out: resolve without scheduling anything further.
    pub fn skip(recommendation: &mut ReviewRecommendation, now: DateTime<Utc>) {
        recommendation.completed = true;
        recommendation.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn fresh_incorrect_attempt_opens_stage_one_due_in_one_day() {
        let at = now();
        let rec = ReviewScheduler::open(Uuid::new_v4(), Uuid::new_v4(), at);

        assert_eq!(rec.review_stage, 1);
        assert_eq!(rec.next_review_at, at + Duration::days(1));
        assert!(rec.last_reviewed_at.is_none());
        assert!(!rec.completed);
    }

    #[test]
    fn three_successes_walk_the_full_ladder() {
        let start = now();
        let mut rec = ReviewScheduler::open(Uuid::new_v4(), Uuid::new_v4(), start);

        let first = start + Duration::days(1);
        ReviewScheduler::complete(&mut rec, true, first);
        assert_eq!(rec.review_stage, 2);
        assert_eq!(rec.next_review_at, first + Duration::days(7));

        let second = first + Duration::days(7);
        ReviewScheduler::complete(&mut rec, true, second);
        assert_eq!(rec.review_stage, 3);
        assert_eq!(rec.next_review_at, second + Duration::days(16));

        let third = second + Duration::days(16);
        ReviewScheduler::complete(&mut rec, true, third);
        assert_eq!(rec.review_stage, 4);
        assert_eq!(rec.next_review_at, third + Duration::days(35));
    }

    #[test]
    fn a_fourth_success_stays_at_stage_four() {
        let at = now();
        let mut rec = ReviewScheduler::open(Uuid::new_v4(), Uuid::new_v4(), at);
        rec.review_stage = 4;

        ReviewScheduler::complete(&mut rec, true, at);
        assert_eq!(rec.review_stage, 4);
        assert_eq!(rec.next_review_at, at + Duration::days(35));
    }

    #[test]
    fn failed_completion_resets_to_stage_one() {
        let at = now();
        let mut rec = ReviewScheduler::open(Uuid::new_v4(), Uuid::new_v4(), at);
        rec.review_stage = 3;

        ReviewScheduler::complete(&mut rec, false, at);
        assert_eq!(rec.review_stage, 1);
        assert_eq!(rec.next_review_at, at + Duration::days(1));
        assert_eq!(rec.last_reviewed_at, Some(at));
    }

    #[test]
    fn repeat_exam_failure_keeps_the_stage_and_rebases_the_clock() {
        let start = now();
        let mut rec = ReviewScheduler::open(Uuid::new_v4(), Uuid::new_v4(), start);
        rec.review_stage = 2;

        let later = start + Duration::days(3);
        ReviewScheduler::repeat_incorrect(&mut rec, later);
        assert_eq!(rec.review_stage, 2);
        assert_eq!(rec.next_review_at, later + Duration::days(7));
        assert!(rec.last_reviewed_at.is_none());
    }

    #[test]
    fn next_review_is_always_after_the_transition_time() {
        let at = now();
        let mut rec = ReviewScheduler::open(Uuid::new_v4(), Uuid::new_v4(), at);
        assert!(rec.next_review_at > at);

        ReviewScheduler::complete(&mut rec, true, at);
        assert!(rec.next_review_at > rec.last_reviewed_at.unwrap());
    }

    #[test]
    fn skip_resolves_without_rescheduling() {
        let at = now();
        let mut rec = ReviewScheduler::open(Uuid::new_v4(), Uuid::new_v4(), at);
        let due_before = rec.next_review_at;

        ReviewScheduler::skip(&mut rec, at + Duration::hours(1));
        assert!(rec.completed);
        assert_eq!(rec.next_review_at, due_before);
        assert!(!rec.is_due(at + Duration::days(2)));
    }
}
