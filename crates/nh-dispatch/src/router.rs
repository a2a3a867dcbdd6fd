//! Routing rule evaluation (spec.md §4.6): expands a validated `Message`'s
//! abstract targets into `(target, platform)` pairs with `platform`
//! resolved, applying configured `RoutingRule`s first and falling back to
//! `TargetType::default_platform` / the registry's first compatible
//! adapter when no rule claims a target.

use nh_common::{DeliveryResult, Message, NotifyError, RuleAction, RoutingRule, Target};
use nh_platform::PlatformRegistry;
use parking_lot::RwLock;

/// One resolved delivery: `target` bound to a concrete `platform`.
#[derive(Debug, Clone)]
pub struct RoutedTarget {
    pub target: Target,
    pub platform: String,
}

/// Output of a route: targets that resolved to a platform, plus synthetic
/// failed results for targets that could not (spec.md §4.6 step 4).
#[derive(Debug, Clone, Default)]
pub struct RouteOutcome {
    pub routed: Vec<RoutedTarget>,
    pub unroutable: Vec<DeliveryResult>,
}

/// Evaluates `RoutingRule`s against a `Message` (spec.md §4.6). Rules live
/// behind a lock so `reload` can swap them wholesale without callers
/// needing a new `Router` (SPEC_FULL.md §4 "Hot configuration reload").
pub struct Router {
    rules: RwLock<Vec<RoutingRule>>,
}

impl Router {
    /// Rules are sorted by descending priority, stable on ties by
    /// declaration index (spec.md §4.6 step 1) — done once here so `route`
    /// doesn't re-sort per call.
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self {
            rules: RwLock::new(sorted(rules)),
        }
    }

    pub fn rules(&self) -> Vec<RoutingRule> {
        self.rules.read().clone()
    }

    /// Replaces the active rule set in place; takes effect for the next
    /// `route` call onward.
    pub fn reload(&self, rules: Vec<RoutingRule>) {
        *self.rules.write() = sorted(rules);
    }

    /// Routes every target of `message` against the configured rules and
    /// the registry's fallbacks. Pure: never mutates `message`; rule
    /// `transform` actions operate on a working copy that only this call
    /// sees (spec.md §4.6 step 2 "never the caller's message").
    pub fn route(&self, message: &Message, registry: &PlatformRegistry) -> RouteOutcome {
        let mut working = message.clone();
        let mut resolved: Vec<(Target, Option<String>)> =
            message.targets.iter().cloned().map(|t| {
                let platform = if t.platform.is_empty() { None } else { Some(t.platform.clone()) };
                (t, platform)
            }).collect();

        let rules = self.rules.read();
        'rules: for rule in rules.iter() {
            if !rule.matches(&working) {
                continue;
            }
            for action in &rule.actions {
                match action {
                    RuleAction::Drop => {
                        let outcome = RouteOutcome {
                            routed: Vec::new(),
                            unroutable: Vec::new(),
                        };
                        return outcome;
                    }
                    RuleAction::Transform { field, value } => {
                        apply_transform(&mut working, field, value);
                    }
                    RuleAction::RouteTo { platforms } => {
                        for (target, platform) in resolved.iter_mut() {
                            if platform.is_some() {
                                continue;
                            }
                            for candidate in platforms {
                                if registry
                                    .get(candidate)
                                    .map(|s| s.capabilities().supports_target_type(target.target_type))
                                    .unwrap_or(false)
                                {
                                    *platform = Some(candidate.clone());
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            if resolved.iter().all(|(_, p)| p.is_some()) {
                break 'rules;
            }
        }

        let mut routed = Vec::new();
        let mut unroutable = Vec::new();
        for (target, platform) in resolved {
            let platform = platform.or_else(|| fallback_platform(&target, registry));
            match platform {
                Some(platform) => routed.push(RoutedTarget { target, platform }),
                None => {
                    let err = NotifyError::no_viable_platform(&target.value);
                    unroutable.push(DeliveryResult::failure(
                        message.id.clone(),
                        target,
                        String::new(),
                        &err,
                        0,
                    ));
                }
            }
        }

        RouteOutcome { routed, unroutable }
    }
}

fn sorted(mut rules: Vec<RoutingRule>) -> Vec<RoutingRule> {
    rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    rules
}

fn apply_transform(message: &mut Message, field: &str, value: &str) {
    match field {
        "title" => message.title = value.to_string(),
        "body" => message.body = value.to_string(),
        "priority" => {
            if let Ok(p) = value.parse() {
                message.priority = p;
            }
        }
        _ => {
            message.metadata.insert(field.to_string(), value.to_string());
        }
    }
}

/// spec.md §4.6 step 3: static type fallback first, then the registry's
/// first adapter claiming the type for user/group/channel targets.
fn fallback_platform(target: &Target, registry: &PlatformRegistry) -> Option<String> {
    target
        .target_type
        .default_platform()
        .filter(|p| registry.contains(p))
        .map(|p| p.to_string())
        .or_else(|| registry.first_supporting(target.target_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nh_common::{RuleCondition, TargetType};
    use nh_platform::MockSender;
    use std::sync::Arc;

    fn registry_with(platforms: &[(&str, Vec<TargetType>)]) -> PlatformRegistry {
        let registry = PlatformRegistry::new();
        for (name, types) in platforms {
            registry.register(Arc::new(MockSender::new(*name).with_target_types(types.clone())));
        }
        registry
    }

    #[test]
    fn falls_back_to_default_platform_for_email() {
        let registry = registry_with(&[("email", vec![TargetType::Email])]);
        let router = Router::new(vec![]);
        let msg = Message::new("t", "b", vec![Target::new(TargetType::Email, "a@x.com")]);
        let outcome = router.route(&msg, &registry);
        assert_eq!(outcome.routed.len(), 1);
        assert_eq!(outcome.routed[0].platform, "email");
        assert!(outcome.unroutable.is_empty());
    }

    #[test]
    fn emits_synthetic_failure_when_no_platform_viable() {
        let registry = PlatformRegistry::new();
        let router = Router::new(vec![]);
        let msg = Message::new("t", "b", vec![Target::new(TargetType::Group, "team-1")]);
        let outcome = router.route(&msg, &registry);
        assert!(outcome.routed.is_empty());
        assert_eq!(outcome.unroutable.len(), 1);
        assert_eq!(outcome.unroutable[0].error.as_ref().unwrap().code, "noViablePlatform");
    }

    #[test]
    fn rule_route_to_wins_over_type_fallback() {
        let registry = registry_with(&[
            ("email", vec![TargetType::Email]),
            ("webhook", vec![TargetType::Email, TargetType::Webhook]),
        ]);
        let rule = RoutingRule {
            name: "critical".into(),
            priority: 10,
            enabled: true,
            conditions: vec![RuleCondition::PriorityIn { priorities: vec![5] }],
            actions: vec![RuleAction::RouteTo { platforms: vec!["webhook".into()] }],
        };
        let router = Router::new(vec![rule]);
        let mut msg = Message::new("t", "b", vec![Target::new(TargetType::Email, "a@x.com")]);
        msg.priority = 5;
        let outcome = router.route(&msg, &registry);
        assert_eq!(outcome.routed[0].platform, "webhook");
    }

    #[test]
    fn drop_action_short_circuits() {
        let registry = registry_with(&[("email", vec![TargetType::Email])]);
        let rule = RoutingRule {
            name: "blackhole".into(),
            priority: 10,
            enabled: true,
            conditions: vec![],
            actions: vec![RuleAction::Drop],
        };
        let router = Router::new(vec![rule]);
        let msg = Message::new("t", "b", vec![Target::new(TargetType::Email, "a@x.com")]);
        let outcome = router.route(&msg, &registry);
        assert!(outcome.routed.is_empty());
        assert!(outcome.unroutable.is_empty());
    }

    #[test]
    fn routing_is_deterministic_for_identical_input() {
        let registry = registry_with(&[("email", vec![TargetType::Email]), ("webhook", vec![TargetType::Webhook])]);
        let router = Router::new(vec![]);
        let msg = Message::new(
            "t",
            "b",
            vec![
                Target::new(TargetType::Email, "a@x.com"),
                Target::new(TargetType::Webhook, "https://example.com/hook"),
            ],
        );
        let first = router.route(&msg, &registry);
        let second = router.route(&msg, &registry);
        let first_platforms: Vec<_> = first.routed.iter().map(|r| r.platform.clone()).collect();
        let second_platforms: Vec<_> = second.routed.iter().map(|r| r.platform.clone()).collect();
        assert_eq!(first_platforms, second_platforms);
    }
}
