//! Allow/deny rules applied to incoming mail.
//!
//! Every rule holding a predicate for a field gives a verdict on it: an
//! allow rule rejects values its pattern does not match, a deny rule rejects
//! values it does match. Rules run in declaration order and the first
//! rejection wins.

use super::error::Rejection;
use crate::spec::mail::{Pattern, Rule, RuleAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Sender,
    Recipient,
    Subject,
    Body,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Sender => "sender",
            Field::Recipient => "recipient",
            Field::Subject => "subject",
            Field::Body => "body",
        }
    }

    fn default_enhanced(self) -> &'static str {
        match self {
            Field::Sender | Field::Recipient => "5.1.0",
            Field::Subject | Field::Body => "5.6.0",
        }
    }

    fn pattern(self, rule: &Rule) -> Option<&Pattern> {
        match self {
            Field::Sender => rule.sender.as_ref(),
            Field::Recipient => rule.recipient.as_ref(),
            Field::Subject => rule.subject.as_ref(),
            Field::Body => rule.body.as_ref(),
        }
    }
}

pub fn check(rules: &[Rule], field: Field, value: &str) -> Result<(), Rejection> {
    for rule in rules {
        let Some(pattern) = field.pattern(rule) else {
            continue;
        };
        let matched = pattern.is_match(value);
        let message = match (rule.action, matched) {
            (RuleAction::Allow, false) => format!(
                "{} {} does not match allow rule: {}",
                field.as_str(),
                value,
                pattern.as_str()
            ),
            (RuleAction::Deny, true) => format!(
                "{} {} does match deny rule: {}",
                field.as_str(),
                value,
                pattern.as_str()
            ),
            _ => continue,
        };
        return Err(rejection(rule, field, message));
    }
    Ok(())
}

fn rejection(rule: &Rule, field: Field, message: String) -> Rejection {
    match &rule.reject_response {
        Some(r) => Rejection {
            status: if r.status_code == 0 { 550 } else { r.status_code },
            enhanced: if r.enhanced_status_code.is_empty() {
                field.default_enhanced().to_string()
            } else {
                r.enhanced_status_code.clone()
            },
            message: if r.text.is_empty() { message } else { r.text.clone() },
        },
        None => Rejection::new(550, field.default_enhanced(), message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(yaml: &str) -> Vec<Rule> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_allow_rule() {
        let r = rules("- sender: .*@foo.bar\n  action: allow\n");
        assert!(check(&r, Field::Sender, "alice@foo.bar").is_ok());
        let err = check(&r, Field::Sender, "alice@bar.baz").unwrap_err();
        assert_eq!(err.status, 550);
        assert_eq!(err.enhanced, "5.1.0");
        assert_eq!(err.message, "sender alice@bar.baz does not match allow rule: .*@foo.bar");
        assert!(check(&r, Field::Recipient, "x@y").is_ok());
    }

    #[test]
    fn test_deny_rule_with_response() {
        let r = rules(
            "- subject: spam\n  action: deny\n  rejectResponse:\n    statusCode: 554\n    enhancedStatusCode: 5.7.1\n    text: no spam\n",
        );
        let err = check(&r, Field::Subject, "buy spam now").unwrap_err();
        assert_eq!(err.to_string(), "554 5.7.1 no spam");
        assert!(check(&r, Field::Subject, "hello").is_ok());
    }

    #[test]
    fn test_content_default_enhanced_code() {
        let r = rules("- body: secret\n  action: deny\n");
        let err = check(&r, Field::Body, "top secret").unwrap_err();
        assert_eq!(err.enhanced, "5.6.0");
    }

    #[test]
    fn test_first_rejection_wins() {
        let r = rules("- sender: '@a'\n  action: deny\n- sender: '@b'\n  action: allow\n");
        let err = check(&r, Field::Sender, "x@a").unwrap_err();
        assert!(err.message.contains("deny rule"));
        let err = check(&r, Field::Sender, "x@c").unwrap_err();
        assert!(err.message.contains("allow rule"));
    }
}
