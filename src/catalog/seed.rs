// SPDX-License-Identifier: MIT
//! Built-in achievement set.
//!
//! Achievement IDs are stable snake_case strings (e.g. `"points_100"`) and
//! must never change across versions — awards reference them by id. The
//! seeded table is administrative data; deployments may extend or replace it,
//! this set is the stock catalog.

use once_cell::sync::Lazy;

use super::{AchievementDefinition, Metric, Requirement};

fn def(
    id: &str,
    name: &str,
    description: &str,
    icon: &str,
    category: &str,
    rarity: &str,
    metric: Metric,
    threshold: i64,
    reward_points: i64,
) -> AchievementDefinition {
    AchievementDefinition {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
        category: category.to_string(),
        rarity: rarity.to_string(),
        requirement: Requirement { metric, threshold },
        reward_points,
    }
}

static DEFAULTS: Lazy<Vec<AchievementDefinition>> = Lazy::new(|| {
    use Metric::*;
    vec![
        // Point milestones
        def("points_100", "First Steps", "Earn your first 100 points", "🌟", "milestone", "common", Points, 100, 50),
        def("points_500", "Dedicated Student", "Accumulate 500 points", "📚", "milestone", "common", Points, 500, 100),
        def("points_1000", "Learning Expert", "Reach 1,000 points", "🎓", "milestone", "rare", Points, 1000, 200),
        def("points_2500", "Knowledge Master", "Conquer 2,500 points", "👑", "milestone", "epic", Points, 2500, 500),
        def("points_5000", "Living Legend", "Hit 5,000 points", "⭐", "milestone", "legendary", Points, 5000, 1000),
        // Streaks
        def("streak_3", "Consistency", "Study three days in a row", "🔥", "streak", "common", Streak, 3, 50),
        def("streak_7", "Focused Week", "Keep a seven-day streak", "💪", "streak", "rare", Streak, 7, 150),
        def("streak_14", "Fortnight of Focus", "Study fourteen days straight", "🚀", "streak", "epic", Streak, 14, 300),
        def("streak_30", "Unstoppable Month", "Complete thirty consecutive days", "💎", "streak", "legendary", Streak, 30, 750),
        // Quizzes
        def("quizzes_5", "Questioner", "Complete 5 quizzes", "🧠", "achievement", "common", QuizzesCompleted, 5, 75),
        def("quizzes_25", "Quiz Master", "Complete 25 quizzes", "🎯", "achievement", "rare", QuizzesCompleted, 25, 250),
        def("quizzes_50", "Quiz Champion", "Complete 50 quizzes", "🏆", "achievement", "epic", QuizzesCompleted, 50, 500),
        // Reading
        def("items_read_5", "Novice Reader", "Read 5 complete summaries", "📖", "achievement", "common", ItemsRead, 5, 75),
        def("items_read_20", "Book Devourer", "Read 20 summaries", "📚", "achievement", "rare", ItemsRead, 20, 200),
        def("items_read_50", "Living Library", "Read 50 summaries", "🗿", "achievement", "epic", ItemsRead, 50, 600),
        // Checklists
        def("checklists_10", "Organizer", "Complete 10 checklist items", "✅", "achievement", "common", ChecklistsCompleted, 10, 50),
        def("checklists_50", "Expert Planner", "Complete 50 checklist items", "📋", "achievement", "rare", ChecklistsCompleted, 50, 200),
        // Notes
        def("notes_10", "Note Taker", "Create 10 notes", "📝", "achievement", "common", NotesCreated, 10, 50),
        def("notes_50", "Dedicated Writer", "Create 50 notes", "✍️", "achievement", "rare", NotesCreated, 50, 250),
        // Specials — satisfied by transient per-event flags
        def("perfect_quiz", "Perfectionist", "Answer every question of a quiz correctly", "💯", "special", "rare", PerfectQuiz, 1, 100),
        def("early_bird", "Early Bird", "Study before 6 in the morning", "🌅", "special", "rare", EarlyBird, 1, 50),
        def("night_owl", "Night Owl", "Study after midnight", "🦉", "special", "rare", NightOwl, 1, 50),
    ]
});

/// The stock catalog.
pub fn default_definitions() -> &'static [AchievementDefinition] {
    &DEFAULTS
}
