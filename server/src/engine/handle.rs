use rand::Rng;

use super::session::Vibe;

const ADJECTIVES: &[&str] = &[
    "Chill", "Cozy", "Quiet", "Bright", "Curious", "Mellow", "Steady", "Warm", "Cool", "Smooth",
    "Easy", "Calm", "Bold", "Swift", "Gentle",
];

fn vibe_nouns(vibe: Vibe) -> &'static [&'static str] {
    match vibe {
        Vibe::Banter => &["Wit", "Spark", "Chat", "Banter", "Quip"],
        Vibe::Intros => &["Friend", "Connector", "Mixer", "Greeter", "Buddy"],
        Vibe::Thinking => &["Thinker", "Mind", "Ponderer", "Muser", "Brain"],
        Vibe::KillingTime => &["Wanderer", "Drifter", "Pauser", "Stroller", "Idler"],
        Vibe::Surprise => &["Wildcard", "Mystery", "Surprise", "Random", "Chance"],
    }
}

fn tag_noun(tag: &str) -> Option<&'static str> {
    match tag {
        "Quietly Curious" => Some("Observer"),
        "Creative Energy" => Some("Creator"),
        "Overthinking Things" => Some("Analyzer"),
        "Big Sci-Fi Brain" => Some("Dreamer"),
        "Here for the humans" => Some("Connector"),
        "Builder brain" => Some("Maker"),
        "Tech curious" => Some("Explorer"),
        "Lo-fi head" => Some("Viber"),
        _ => None,
    }
}

/// Generate an anonymous display handle: `AdjectiveNoun##`.
/// A tag-derived noun wins a coin flip when one of the tags maps; the vibe
/// pool covers the rest.
pub fn generate_handle(vibe: Vibe, tags: &[String]) -> String {
    let mut rng = rand::thread_rng();

    let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let from_tag = tags.iter().find_map(|t| tag_noun(t));
    let noun = match from_tag {
        Some(n) if rng.gen_bool(0.5) => n,
        _ => {
            let nouns = vibe_nouns(vibe);
            nouns[rng.gen_range(0..nouns.len())]
        }
    };
    let number: u8 = rng.gen_range(10..100);

    format!("{adjective}{noun}{number}")
}
