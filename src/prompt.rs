//! Provider-agnostic prompt construction.
//!
//! Every builder ends its prompt with a PNG-only output directive so that
//! providers answer with an image rather than prose.

/// Marker whose presence means an instruction already carries the directive.
pub const PNG_DIRECTIVE_MARKER: &str = "Output only a PNG image";

/// Suffix appended by [`edit_prompt`].
pub const EDIT_DIRECTIVE: &str =
    "Output only a PNG image; no text in the response; keep resolution similar to input.";

const SHORT_DIRECTIVE: &str = "Output only a PNG image; no text.";

/// Append the edit directive unless the instruction already contains it.
///
/// Applying this twice yields the same string as applying it once.
#[must_use]
pub fn edit_prompt(instruction: &str) -> String {
    if instruction.contains(PNG_DIRECTIVE_MARKER) {
        return instruction.to_string();
    }
    let trimmed = instruction.trim();
    if trimmed.is_empty() {
        EDIT_DIRECTIVE.to_string()
    } else {
        format!("{trimmed} {EDIT_DIRECTIVE}")
    }
}

/// Frame an instruction for a two-image blend where image 2 is a reference for image 1.
///
/// Unlike [`edit_prompt`] the directive is always appended.
#[must_use]
pub fn blend_prompt(instruction: &str) -> String {
    format!(
        "Transform the base image according to this instruction: {}. \
         Use the second image as a style/texture/object reference to blend or fuse realistically. \
         Match lighting/perspective; add a soft contact shadow. {SHORT_DIRECTIVE}",
        instruction.trim()
    )
}

/// Body region an item of the given category is aligned to.
#[must_use]
pub fn anchor_for(category: &str) -> &'static str {
    match category.trim().to_ascii_lowercase().as_str() {
        "sunglasses" | "glasses" => "eyes",
        "necklace" => "neck",
        "hat" => "top of the head",
        "earrings" => "ears",
        "watch" | "bracelet" => "wrist",
        "ring" => "ring finger",
        "shirt" | "tshirt" | "jacket" => "upper torso",
        "shoes" => "feet",
        _ => "appropriate body area",
    }
}

fn label_for(category: &str) -> String {
    let c = category.trim().to_ascii_lowercase();
    let article = match c.chars().next() {
        Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
        _ => "a",
    };
    format!("{article} {c}")
}

/// Build a try-on instruction for an item of `category` worn by a person.
///
/// With `item_first` the item is the first supplied image and the person the
/// second; otherwise the second image is the item.
#[must_use]
pub fn try_on_prompt(category: &str, notes: &str, item_first: bool) -> String {
    let anchor = anchor_for(category);
    let label = label_for(category);
    let notes = notes.trim().trim_end_matches('.');
    let extra = if notes.is_empty() { String::new() } else { format!(" {notes}.") };

    if item_first {
        format!(
            "There are TWO images. The FIRST image is {label} to be worn. The SECOND image is the person. \
             Remove any background around the item, place the FIRST image on the SECOND image aligned to the {anchor}, \
             match perspective and lighting, size realistically, and add a soft contact shadow. \
             Preserve the person's identity and keep all other details unchanged.{extra} {SHORT_DIRECTIVE}"
        )
    } else {
        format!(
            "Place the second image as {label} on the person. Remove any background around the item, \
             align to the {anchor}, match perspective and lighting, size realistically, and cast a soft contact shadow. \
             Preserve identity and keep all other details unchanged.{extra} {SHORT_DIRECTIVE}"
        )
    }
}

/// Instruction for one comic panel featuring the persona from the reference image.
#[must_use]
pub fn comic_panel_prompt(style: &str, panel_text: &str) -> String {
    format!(
        "Using the SAME PERSON as the reference, generate a comic panel in {} where they: {}. \
         Keep face shape, eyes, hair, and skin consistent. {SHORT_DIRECTIVE}",
        style.trim(),
        panel_text.trim()
    )
}
