//! Status Classifier
//!
//! Best-effort tagging of free-text status messages, Portuguese and English.
//! Rules are tried in order; the first hit wins. No match yields
//! `MessageType::Raw`, which never blocks ingestion.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Cause, MessageType, Outlook, ServiceState};

struct Rules {
    closed: Option<Regex>,
    regular: Option<Regex>,
    special: Option<Regex>,
    causes: Vec<(Regex, Cause)>,
    states: Vec<(Regex, ServiceState)>,
    outlooks: Vec<(Regex, Outlook)>,
    generic: Option<Regex>,
}

/// Case-insensitive pattern; invalid patterns are skipped
fn re(pattern: &str) -> Option<Regex> {
    match Regex::new(&format!("(?i){pattern}")) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!("Skipping invalid classifier pattern {}: {}", pattern, e);
            None
        }
    }
}

fn tagged<T>(rules: Vec<(Option<Regex>, T)>) -> Vec<(Regex, T)> {
    rules
        .into_iter()
        .filter_map(|(re, tag)| re.map(|re| (re, tag)))
        .collect()
}

fn hit(re: &Option<Regex>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

static RULES: Lazy<Rules> = Lazy::new(|| Rules {
    closed: re(r"encerrad[ao]|fechad[ao]|closed for service|line (is )?closed|service has ended"),
    regular: re(r"circula[cç][aã]o normal|normal service|good service|running normally|service (has )?resumed"),
    special: re(r"servi[cç]o especial|special service"),
    causes: tagged(vec![
        (re(r"avaria (num|de|no) comboio|comboio avariado|train (breakdown|failure|fault)|broken.down train"), Cause::TrainBreakdown),
        (re(r"passageiro|pessoa na via|passenger|person on the track"), Cause::Passenger),
        (re(r"sinaliza[cç][aã]o|signal"), Cause::Signalling),
        (re(r"energia|power (outage|failure|supply)"), Cause::Power),
        (re(r"infraestrutura|avaria na via|track (fault|works)|infrastructure"), Cause::Infrastructure),
    ]),
    states: tagged(vec![
        (re(r"interrompid[ao]|suspens[ao]|suspended|interrupted|halted|no service"), ServiceState::Halted),
        (re(r"velocidade reduzida|lent[ao]|reduced speed|running slow"), ServiceState::Slow),
        (re(r"perturba[cç]|atraso|irregular|delay"), ServiceState::Delayed),
    ]),
    outlooks: tagged(vec![
        (re(r"superior a 15|more than 15|over 15 min|prolonged"), Outlook::Long),
        (re(r"inferior a 15|less than 15|under 15 min|brief"), Outlook::Short),
    ]),
    generic: re(r"perturba[cç]|atraso|delay|disrupt|problem|problema|irregular"),
});

fn first_match<T: Copy>(rules: &[(Regex, T)], text: &str) -> Option<T> {
    rules.iter().find(|(re, _)| re.is_match(text)).map(|(_, tag)| *tag)
}

/// Tag a free-text status message
pub fn classify(text: &str) -> MessageType {
    let rules = &*RULES;

    if hit(&rules.closed, text) {
        return MessageType::Closed;
    }
    if hit(&rules.regular, text) {
        return MessageType::RegularService;
    }
    if hit(&rules.special, text) {
        return MessageType::SpecialService;
    }

    let cause = first_match(&rules.causes, text);
    let state = first_match(&rules.states, text);
    if let (Some(cause), Some(state)) = (cause, state) {
        let outlook = first_match(&rules.outlooks, text).unwrap_or(Outlook::Unknown);
        return MessageType::Composite { cause, state, outlook };
    }

    if state.is_some() || hit(&rules.generic, text) {
        return MessageType::GenericDisturbance;
    }

    MessageType::Raw
}
