use chrono::{DateTime, Utc};

use crate::models::comment::Engagement;

const LIKE_WEIGHT: f64 = 1.0;
const DISLIKE_WEIGHT: f64 = 0.5;
const REPLY_WEIGHT: f64 = 2.0;
const HALF_LIFE_HOURS: f64 = 72.0;

/// Popularity score with exponential recency decay. Always finite.
pub fn score(likes: i32, dislikes: i32, replies: i32, age_hours: f64) -> f64 {
    let likes = likes.max(0) as f64;
    let dislikes = dislikes.max(0) as f64;
    let replies = replies.max(0) as f64;

    let raw = LIKE_WEIGHT * likes - DISLIKE_WEIGHT * dislikes + REPLY_WEIGHT * replies;
    let age = if age_hours.is_finite() { age_hours.max(0.0) } else { 0.0 };
    let decay = 0.5_f64.powf(age / HALF_LIFE_HOURS);

    let value = raw * decay;
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

pub fn score_for(engagement: &Engagement, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_hours = (now - created_at).num_seconds() as f64 / 3600.0;
    score(
        engagement.likes.count,
        engagement.dislikes.count,
        engagement.replies.count,
        age_hours,
    )
}
