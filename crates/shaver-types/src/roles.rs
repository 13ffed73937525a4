use serde::{Deserialize, Serialize};

/// Effective role of a user inside one group.
///
/// Stored as a single column so that "admin and acting leader at once" cannot
/// be represented. Ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    ActingLeader,
    Admin,
}

impl Role {
    /// Derive a role from the legacy `is_admin` / `is_acting_leader` flag pair.
    /// Admin wins when both are set.
    pub fn from_flags(is_admin: bool, is_acting_leader: bool) -> Self {
        if is_admin {
            Self::Admin
        } else if is_acting_leader {
            Self::ActingLeader
        } else {
            Self::Member
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::ActingLeader => "acting_leader",
            Self::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "member" => Some(Self::Member),
            "acting_leader" => Some(Self::ActingLeader),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Actions subject to a role check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    PostMessage,
    AddMember,
    RemoveMember,
    SetActingLeader,
    RemoveActingLeader,
    RotateInviteCode,
}

impl Action {
    /// Whether the action is aimed at another member whose role matters.
    pub fn has_target(&self) -> bool {
        matches!(
            self,
            Self::RemoveMember | Self::SetActingLeader | Self::RemoveActingLeader
        )
    }
}

/// Authorization policy. `actor` is `None` when the user is not a member;
/// `target` is the role of the member being acted on, if any.
pub fn permits(actor: Option<Role>, action: Action, target: Option<Role>) -> bool {
    let Some(actor) = actor else {
        return false;
    };

    match action {
        Action::PostMessage => true,
        Action::AddMember | Action::RotateInviteCode => {
            matches!(actor, Role::Admin | Role::ActingLeader)
        }
        Action::SetActingLeader | Action::RemoveActingLeader => actor == Role::Admin,
        Action::RemoveMember => match actor {
            Role::Admin => true,
            // Acting leaders never act against peers or superiors.
            Role::ActingLeader => target == Some(Role::Member),
            Role::Member => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_members_can_do_nothing() {
        for action in [
            Action::PostMessage,
            Action::AddMember,
            Action::RemoveMember,
            Action::SetActingLeader,
            Action::RemoveActingLeader,
            Action::RotateInviteCode,
        ] {
            assert!(!permits(None, action, Some(Role::Member)));
        }
    }

    #[test]
    fn every_member_may_post() {
        for role in [Role::Member, Role::ActingLeader, Role::Admin] {
            assert!(permits(Some(role), Action::PostMessage, None));
        }
    }

    #[test]
    fn acting_leader_removes_members_only() {
        let leader = Some(Role::ActingLeader);
        assert!(permits(leader, Action::RemoveMember, Some(Role::Member)));
        assert!(!permits(leader, Action::RemoveMember, Some(Role::Admin)));
        assert!(!permits(leader, Action::RemoveMember, Some(Role::ActingLeader)));
    }

    #[test]
    fn admin_removes_anyone() {
        let admin = Some(Role::Admin);
        assert!(permits(admin, Action::RemoveMember, Some(Role::Member)));
        assert!(permits(admin, Action::RemoveMember, Some(Role::ActingLeader)));
        assert!(permits(admin, Action::RemoveMember, Some(Role::Admin)));
    }

    #[test]
    fn only_admin_manages_acting_leaders() {
        for action in [Action::SetActingLeader, Action::RemoveActingLeader] {
            assert!(permits(Some(Role::Admin), action, Some(Role::Member)));
            assert!(!permits(Some(Role::ActingLeader), action, Some(Role::Member)));
            assert!(!permits(Some(Role::Member), action, Some(Role::Member)));
        }
    }

    #[test]
    fn invites_and_rotation_need_leadership() {
        for action in [Action::AddMember, Action::RotateInviteCode] {
            assert!(permits(Some(Role::Admin), action, None));
            assert!(permits(Some(Role::ActingLeader), action, None));
            assert!(!permits(Some(Role::Member), action, None));
        }
    }

    #[test]
    fn admin_flag_takes_precedence() {
        assert_eq!(Role::from_flags(true, true), Role::Admin);
        assert_eq!(Role::from_flags(false, true), Role::ActingLeader);
        assert_eq!(Role::from_flags(false, false), Role::Member);
    }
}
