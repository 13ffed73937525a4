mod common;

use shaver_gateway::ChatError;
use shaver_types::models::MessageKind;
use shaver_types::roles::Role;

use common::{harness, text_body};

#[tokio::test]
async fn acting_leader_manages_plain_members_only() {
    let h = harness();
    let (admin, alice, bob, carol) = (h.user("admin"), h.user("alice"), h.user("bob"), h.user("carol"));
    let group = h.group(&admin, "rustaceans").await;
    for user in [&alice, &bob, &carol] {
        h.join(user, &admin, group.id).await;
    }
    let svc = &h.service;

    svc.set_acting_leader(&admin, group.id, alice.user_id).await.unwrap();
    svc.set_acting_leader(&admin, group.id, carol.user_id).await.unwrap();

    // May remove and re-add a plain member.
    svc.remove_member(&alice, group.id, bob.user_id).await.unwrap();
    svc.add_member(&alice, group.id, "bob").await.unwrap();
    // May rotate the invite code.
    svc.rotate_invite_code(&alice, group.id).await.unwrap();

    // Never against a peer or the admin.
    assert!(matches!(
        svc.remove_member(&alice, group.id, carol.user_id).await,
        Err(ChatError::Forbidden)
    ));
    assert!(matches!(
        svc.remove_member(&alice, group.id, admin.user_id).await,
        Err(ChatError::Forbidden)
    ));
    // Cannot hand out or take away leadership.
    assert!(matches!(
        svc.set_acting_leader(&alice, group.id, bob.user_id).await,
        Err(ChatError::Forbidden)
    ));
    assert!(matches!(
        svc.remove_acting_leader(&alice, group.id, carol.user_id).await,
        Err(ChatError::Forbidden)
    ));
}

#[tokio::test]
async fn plain_members_cannot_manage_anything() {
    let h = harness();
    let (admin, alice, bob) = (h.user("admin"), h.user("alice"), h.user("bob"));
    let group = h.group(&admin, "g").await;
    h.join(&alice, &admin, group.id).await;
    h.join(&bob, &admin, group.id).await;
    let svc = &h.service;

    assert!(matches!(svc.add_member(&alice, group.id, "carol").await, Err(ChatError::Forbidden)));
    assert!(matches!(svc.remove_member(&alice, group.id, bob.user_id).await, Err(ChatError::Forbidden)));
    assert!(matches!(svc.rotate_invite_code(&alice, group.id).await, Err(ChatError::Forbidden)));

    // But posting is fine, and members never see the invite code.
    h.say(&alice, group.id, "hi").await;
    let seen = svc.group_for_member(alice.user_id, group.id).await.unwrap();
    assert_eq!(seen.role, Role::Member);
    assert!(seen.invite_code.is_none());
}

#[tokio::test]
async fn creator_stays_admin_no_matter_what() {
    let h = harness();
    let (admin, alice) = (h.user("admin"), h.user("alice"));
    let group = h.group(&admin, "g").await;
    h.join(&alice, &admin, group.id).await;
    let svc = &h.service;
    svc.set_acting_leader(&admin, group.id, alice.user_id).await.unwrap();

    assert!(matches!(
        svc.remove_member(&admin, group.id, admin.user_id).await,
        Err(ChatError::Forbidden)
    ));
    assert!(matches!(
        svc.remove_member(&alice, group.id, admin.user_id).await,
        Err(ChatError::Forbidden)
    ));
    assert!(matches!(svc.leave(&admin, group.id).await, Err(ChatError::Forbidden)));
    assert!(matches!(
        svc.set_acting_leader(&admin, group.id, admin.user_id).await,
        Err(ChatError::Validation(_))
    ));
    assert!(matches!(
        svc.remove_acting_leader(&admin, group.id, admin.user_id).await,
        Err(ChatError::Validation(_))
    ));

    let members = svc.members(admin.user_id, group.id).await.unwrap().members;
    let creator = members.iter().find(|m| m.user_id == admin.user_id).unwrap();
    assert_eq!(creator.role, Role::Admin);
    assert!(creator.is_creator);
}

#[tokio::test]
async fn role_changes_apply_on_the_next_action() {
    let h = harness();
    let (admin, alice) = (h.user("admin"), h.user("alice"));
    h.user("dave");
    h.user("erin");
    let group = h.group(&admin, "g").await;
    h.join(&alice, &admin, group.id).await;
    let svc = &h.service;

    svc.set_acting_leader(&admin, group.id, alice.user_id).await.unwrap();
    svc.add_member(&alice, group.id, "dave").await.unwrap();

    svc.remove_acting_leader(&admin, group.id, alice.user_id).await.unwrap();
    assert_eq!(
        svc.authority().role_of(alice.user_id, group.id).await.unwrap(),
        Some(Role::Member)
    );
    assert!(matches!(svc.add_member(&alice, group.id, "erin").await, Err(ChatError::Forbidden)));

    svc.remove_member(&admin, group.id, alice.user_id).await.unwrap();
    assert_eq!(svc.authority().role_of(alice.user_id, group.id).await.unwrap(), None);
}

#[tokio::test]
async fn removed_members_lose_access_at_once() {
    let h = harness();
    let (admin, alice) = (h.user("admin"), h.user("alice"));
    let group = h.group(&admin, "g").await;
    h.join(&alice, &admin, group.id).await;
    let svc = &h.service;

    svc.remove_member(&admin, group.id, alice.user_id).await.unwrap();
    assert!(matches!(
        svc.post_message(&alice, group.id, MessageKind::Text, text_body("still here?")).await,
        Err(ChatError::Forbidden)
    ));
    assert!(matches!(svc.history(alice.user_id, group.id, 50, None).await, Err(ChatError::Forbidden)));
}

#[tokio::test]
async fn missing_targets_and_groups_are_not_found() {
    let h = harness();
    let (admin, stranger) = (h.user("admin"), h.user("stranger"));
    let group = h.group(&admin, "g").await;
    let svc = &h.service;

    assert!(matches!(
        svc.remove_member(&admin, group.id, stranger.user_id).await,
        Err(ChatError::NotFound("member"))
    ));
    assert!(matches!(
        svc.add_member(&admin, group.id, "nobody").await,
        Err(ChatError::NotFound("user"))
    ));
    assert!(matches!(
        svc.history(admin.user_id, uuid::Uuid::new_v4(), 50, None).await,
        Err(ChatError::NotFound("group"))
    ));
    assert!(matches!(svc.members(stranger.user_id, group.id).await, Err(ChatError::Forbidden)));
}

#[tokio::test]
async fn adding_an_existing_member_conflicts() {
    let h = harness();
    let (admin, alice) = (h.user("admin"), h.user("alice"));
    let group = h.group(&admin, "g").await;
    h.join(&alice, &admin, group.id).await;

    assert!(matches!(
        h.service.add_member(&admin, group.id, "alice").await,
        Err(ChatError::AlreadyMember)
    ));
}
