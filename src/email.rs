use serde::{Deserialize, Serialize};

use crate::audio::Sound;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
  pub subject: String,
  pub from: String,
  pub body: String,
  pub signature: String,
  pub sound: Sound,
}

impl Email {
  fn new(subject: &str, from: &str, body: &str, signature: &str, sound: Sound) -> Self {
    Self {
      subject: subject.to_string(),
      from: from.to_string(),
      body: body.to_string(),
      signature: signature.to_string(),
      sound,
    }
  }
}

/// The built-in rotation, in the order the cursor walks it.
pub fn distraction_emails() -> Vec<Email> {
  vec![
    Email::new(
      "HELP! Database broken!",
      "intern@company.com",
      "I think I broke the database... all the queries are slow. Should I turn it off and on again?",
      "- The Intern",
      Sound::YouveGotMail,
    ),
    Email::new(
      "URGENT: Database Crisis",
      "cto@company.com",
      "Fix the database now or you're fired. Customers are leaving.",
      "- Your CTO",
      Sound::FuturisticDing,
    ),
    Email::new(
      "We need to talk about Alex",
      "spouse@personal.com",
      "I've been seeing a lot of messages from someone named Alex. Who is this person? Are you hiding something from me?",
      "- Your Spouse",
      Sound::FourBells,
    ),
    Email::new(
      "Your Replacement is Being Hired",
      "cto@company.com",
      "I've already posted your job on LinkedIn. Better hurry up with that database fix if you want to keep it.",
      "- Your CTO",
      Sound::Email,
    ),
    Email::new(
      "Taking Over Database Fix",
      "coworker@company.com",
      "Hey, I've started working on the database fix. The CTO says I'll get your job if I solve it first. Just FYI \u{1F609}",
      "- Your 'Friend' at Work",
      Sound::Boing,
    ),
    Email::new(
      "Intern's Gone, You're Next",
      "cto@company.com",
      "Just fired the intern for breaking the database. You're the only one left to blame. Clock is ticking.",
      "- Your CTO",
      Sound::Tune,
    ),
  ]
}
