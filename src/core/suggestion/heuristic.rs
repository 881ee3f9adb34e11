//! Deterministic keyword table used when no completion is available.

/// Reply for empty input.
pub const EMPTY_INPUT_REPLY: &str = "That sounds interesting!";

/// Reply when no rule matches.
pub const DEFAULT_REPLY: &str = "That sounds really interesting! Tell me more about it.";

enum Trigger {
    /// Any phrase present
    Any(&'static [&'static str]),
    /// Every phrase present
    All(&'static [&'static str]),
}

impl Trigger {
    fn matches(&self, text: &str) -> bool {
        match self {
            Trigger::Any(phrases) => phrases.iter().any(|p| text.contains(p)),
            Trigger::All(phrases) => phrases.iter().all(|p| text.contains(p)),
        }
    }
}

/// Rules in priority order; first match wins.
const RULES: &[(Trigger, &str)] = &[
    (
        Trigger::Any(&["how are you", "what's up", "how is it going"]),
        "I'm doing great, thanks for asking! How about you?",
    ),
    (
        Trigger::Any(&["your name"]),
        "My name is Alex. It's nice to meet you!",
    ),
    (
        Trigger::All(&["where", "from"]),
        "I'm from Beijing, China. It's a beautiful city!",
    ),
    (
        Trigger::Any(&["your day", "today"]),
        "My day has been pretty good! I've been busy with work.",
    ),
    (
        Trigger::Any(&["hobby", "free time", "fun"]),
        "I love reading books and playing video games in my free time.",
    ),
    (
        Trigger::Any(&["weather"]),
        "The weather is lovely today! Perfect for a walk outside.",
    ),
    (
        Trigger::Any(&["food", "eat", "hungry"]),
        "I'd love some pizza! It's my favorite food.",
    ),
    (
        Trigger::Any(&["movie", "watch"]),
        "I really enjoy watching action movies and comedies!",
    ),
    (
        Trigger::Any(&["music", "song"]),
        "I love pop music! Taylor Swift is my favorite singer.",
    ),
    (
        Trigger::Any(&["work", "job"]),
        "I work as a software engineer. It's challenging but fun!",
    ),
    (
        Trigger::Any(&["weekend", "plan"]),
        "I'm planning to hang out with friends this weekend.",
    ),
    (
        Trigger::Any(&["travel", "visit"]),
        "I'd love to visit Japan someday! The culture is amazing.",
    ),
    (
        Trigger::Any(&["learn", "english", "study"]),
        "I practice English every day by watching movies and talking to people.",
    ),
    (
        Trigger::Any(&["favorite"]),
        "That's a tough question! I have so many favorites.",
    ),
    (
        Trigger::Any(&["do you like", "do you enjoy"]),
        "Yes, I really enjoy it! It makes me happy.",
    ),
    (
        Trigger::Any(&["?"]),
        "That's a great question! Let me think about it.",
    ),
];

/// Pick a canned answer for `utterance`. Never returns an empty string.
pub fn heuristic_reply(utterance: &str) -> &'static str {
    if utterance.trim().is_empty() {
        return EMPTY_INPUT_REPLY;
    }

    let text = utterance.to_lowercase();
    RULES
        .iter()
        .find(|(trigger, _)| trigger.matches(&text))
        .map(|(_, reply)| *reply)
        .unwrap_or(DEFAULT_REPLY)
}
