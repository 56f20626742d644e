//! Built-in question bank.

use super::{Catalog, Category, Choice, Question};

fn five_point() -> Vec<Choice> {
    vec![
        Choice::new("A", "Not at all"),
        Choice::new("B", "Not really"),
        Choice::new("C", "Neutral"),
        Choice::new("D", "Somewhat"),
        Choice::new("E", "Very much"),
    ]
}

const CATEGORIES: &[(&str, &str)] = &[
    ("game_style", "Game style"),
    ("communication", "Communication"),
    ("play_time", "Play time & rhythm"),
    ("distance", "Distance & boundaries"),
    ("money", "Money & spending"),
    ("future", "Outlook & values"),
];

const QUESTIONS: &[(u32, &str, &str)] = &[
    (1, "game_style", "I care a lot about winning or losing."),
    (2, "game_style", "I bounce back quickly after a loss."),
    (3, "game_style", "I often look up guides, wikis or videos."),
    (4, "game_style", "I usually play with efficiency in mind."),
    (5, "game_style", "I stick with one game for a long time."),
    (6, "communication", "I like talking over voice chat while playing."),
    (7, "communication", "When teamwork matters, I take the lead with calls and ideas."),
    (8, "communication", "Playing together in silence doesn't bother me."),
    (9, "communication", "I open up fairly quickly even with people I've just met."),
    (10, "communication", "Small talk and shared jokes during a game matter to me."),
    (11, "play_time", "I play regularly even on weekdays."),
    (12, "play_time", "I often play late at night."),
    (13, "play_time", "I tend to put games ahead of other plans."),
    (14, "play_time", "My daily rhythm is fairly stable."),
    (15, "play_time", "I value hobbies and time outside of games."),
    (16, "distance", "I like to stay in touch every day."),
    (17, "distance", "Controlling or intrusive relationships are hard for me."),
    (18, "distance", "I need plenty of time to myself."),
    (19, "distance", "When there is friction, I want to talk it through."),
    (20, "distance", "Even with friends, I keep clear private boundaries."),
    (21, "money", "I don't mind paying for skins or battle passes."),
    (22, "money", "Spending on games is an investment in the experience."),
    (23, "money", "I budget my hobby spending carefully."),
    (24, "money", "Gacha pulls and limited items get me fired up."),
    (25, "money", "Value for money matters a lot to me."),
    (26, "future", "Games are a big part of my life."),
    (27, "future", "I enjoy trying new things."),
    (28, "future", "I usually prefer excitement and change over stability."),
    (29, "future", "I make goals and plans for the future."),
    (30, "future", "I want to align on values with someone early on."),
];

pub(super) fn catalog() -> Catalog {
    let questions = QUESTIONS
        .iter()
        .map(|&(id, category, text)| Question {
            id,
            category: category.to_string(),
            text: text.to_string(),
            choices: five_point(),
        })
        .collect();
    let categories = CATEGORIES
        .iter()
        .map(|&(key, label)| Category {
            key: key.to_string(),
            label: label.to_string(),
        })
        .collect();
    Catalog::new(questions, categories)
}
