//! Role assertions. The role is looked up before the stimulus is sent so an
//! unknown role fails without touching the bot.

use std::fmt;

use async_trait::async_trait;
use parley_proto::{EventKind, Message, Occurrence, Role, RoleIdentifier, Transport};
use serde_json::Value;

use super::{AssertionContext, Comparison, Matcher, Predicate, not, type_of};
use crate::verdict::report;

/// Identifier plus the role it resolved to during `prepare`.
#[derive(Debug, Clone)]
struct RoleTarget {
    identifier: RoleIdentifier,
    found: Option<Role>,
}

impl RoleTarget {
    fn new(identifier: RoleIdentifier) -> Self {
        Self {
            identifier,
            found: None,
        }
    }

    fn validate(&self, ctx: &AssertionContext) -> Result<(), String> {
        if self.identifier.is_empty() {
            return Err(report("role identifier with an id or a name", "nothing"));
        }
        if ctx.guild_id().is_none() {
            return Err(report(
                format!("a guild id to look up {}", self.identifier),
                "no guild id",
            ));
        }
        Ok(())
    }

    async fn resolve(&mut self, transport: &dyn Transport, ctx: &AssertionContext) -> Result<(), String> {
        let guild = ctx.guild_id().unwrap_or_default();
        match transport.find_role(guild, &self.identifier).await {
            Ok(Some(role)) => {
                self.found = Some(role);
                Ok(())
            }
            Ok(None) => Err(report(
                format!("{} to exist in guild {}", self.identifier, guild),
                "no role found",
            )),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Predicate for updates of the resolved role where `changed` differs.
    fn updates(&self, changed: fn(&Role, &Role) -> bool) -> Predicate {
        let id = self.found.as_ref().map(|r| r.id.clone());
        Box::new(move |occ| {
            occ.role_update().is_some_and(|(before, after)| {
                id.as_deref() == Some(after.id.as_str()) && changed(before, after)
            })
        })
    }

    fn label(&self) -> String {
        match &self.found {
            Some(role) => format!("role '{}'", role.name),
            None => self.identifier.to_string(),
        }
    }
}

fn updated_role(matched: &[Occurrence]) -> Option<&Role> {
    matched
        .first()
        .and_then(Occurrence::role_update)
        .map(|(_, after)| after)
}

/// The bot renames a role.
#[derive(Debug, Clone)]
pub struct ToRenameRole {
    raw: Value,
    name: String,
    role: RoleTarget,
}

impl ToRenameRole {
    /// `new_name` must be a non-blank string or a number.
    pub fn new(new_name: Value, role: RoleIdentifier) -> Self {
        Self {
            raw: new_name,
            name: String::new(),
            role: RoleTarget::new(role),
        }
    }
}

#[async_trait]
impl Matcher for ToRenameRole {
    fn name(&self) -> &'static str {
        "to_rename_role"
    }

    fn validate(&mut self, ctx: &AssertionContext) -> Result<(), String> {
        self.role.validate(ctx)?;
        self.name = match &self.raw {
            Value::String(s) if s.trim().is_empty() => {
                return Err(report(
                    "parameter new name must be a valid string",
                    format!("'{}'", s),
                ));
            }
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(report(
                    "parameter new name must be a string or a number",
                    type_of(other),
                ));
            }
        };
        Ok(())
    }

    async fn prepare(
        &mut self,
        transport: &dyn Transport,
        ctx: &AssertionContext,
    ) -> Result<(), String> {
        self.role.resolve(transport, ctx).await
    }

    fn event_kind(&self) -> EventKind {
        EventKind::RoleUpdate
    }

    fn predicate(&self, _ctx: &AssertionContext, _stimulus: &Message) -> Predicate {
        self.role.updates(|before, after| before.name != after.name)
    }

    fn compare(&self, matched: &[Occurrence]) -> Comparison {
        match updated_role(matched) {
            Some(role) => Comparison::new(
                role.name == self.name,
                format!("role renamed to '{}'", role.name),
            ),
            None => Comparison::new(false, "name was not changed"),
        }
    }

    fn expectation(&self, negated: bool) -> String {
        format!(
            "{} {}to be renamed to '{}'",
            self.role.label(),
            not(negated),
            self.name
        )
    }

    fn event_description(&self) -> String {
        format!("a rename of {}", self.role.label())
    }
}

/// A boolean role setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleFlag {
    Mentionable,
    Hoist,
}

impl RoleFlag {
    fn get(self, role: &Role) -> bool {
        match self {
            RoleFlag::Mentionable => role.mentionable,
            RoleFlag::Hoist => role.hoist,
        }
    }
}

impl fmt::Display for RoleFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RoleFlag::Mentionable => "mentionable",
            RoleFlag::Hoist => "hoist",
        })
    }
}

/// The bot toggles a boolean role setting.
#[derive(Debug, Clone)]
pub struct ToSetRoleFlag {
    flag: RoleFlag,
    raw: Value,
    expected: bool,
    role: RoleTarget,
}

impl ToSetRoleFlag {
    /// `value` must be a strict boolean.
    pub fn new(flag: RoleFlag, value: Value, role: RoleIdentifier) -> Self {
        Self {
            flag,
            raw: value,
            expected: false,
            role: RoleTarget::new(role),
        }
    }

    pub fn mentionable(value: Value, role: RoleIdentifier) -> Self {
        Self::new(RoleFlag::Mentionable, value, role)
    }

    pub fn hoist(value: Value, role: RoleIdentifier) -> Self {
        Self::new(RoleFlag::Hoist, value, role)
    }
}

#[async_trait]
impl Matcher for ToSetRoleFlag {
    fn name(&self) -> &'static str {
        match self.flag {
            RoleFlag::Mentionable => "to_set_role_mentionable",
            RoleFlag::Hoist => "to_set_role_hoist",
        }
    }

    fn validate(&mut self, ctx: &AssertionContext) -> Result<(), String> {
        self.role.validate(ctx)?;
        self.expected = match &self.raw {
            Value::Bool(b) => *b,
            Value::Null => {
                return Err(report(
                    format!("{} option to be true or false", self.flag),
                    "null",
                ));
            }
            other => {
                return Err(report(
                    format!("{} parameter to be of boolean type", self.flag),
                    type_of(other),
                ));
            }
        };
        Ok(())
    }

    async fn prepare(
        &mut self,
        transport: &dyn Transport,
        ctx: &AssertionContext,
    ) -> Result<(), String> {
        self.role.resolve(transport, ctx).await
    }

    fn event_kind(&self) -> EventKind {
        EventKind::RoleUpdate
    }

    fn predicate(&self, _ctx: &AssertionContext, _stimulus: &Message) -> Predicate {
        match self.flag {
            RoleFlag::Mentionable => self.role.updates(|b, a| b.mentionable != a.mentionable),
            RoleFlag::Hoist => self.role.updates(|b, a| b.hoist != a.hoist),
        }
    }

    fn compare(&self, matched: &[Occurrence]) -> Comparison {
        match updated_role(matched) {
            Some(role) => {
                let actual = self.flag.get(role);
                Comparison::new(actual == self.expected, format!("{} = {}", self.flag, actual))
            }
            None => Comparison::new(false, format!("role {} was not updated", self.flag)),
        }
    }

    fn expectation(&self, negated: bool) -> String {
        format!(
            "{} of {} {}to be {}",
            self.flag,
            self.role.label(),
            not(negated),
            self.expected
        )
    }

    fn event_description(&self) -> String {
        format!("an update of {} on {}", self.flag, self.role.label())
    }
}
