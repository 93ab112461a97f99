//! Property tests for the permission lattice and the invitation state machine.
//!
//! 1. The owner resolves to `Owner` for any share, and nobody else ever does.
//! 2. A non-owner's effective permission is exactly their accepted share's level.
//! 3. `can_chat` implies `can_mutate`, and `Edit` can mutate but never chat.
//! 4. Any sequence of decisions moves a pending share at most once.

use focusflow_proto::ids::{TaskId, UserId};
use focusflow_proto::share::{
    EffectivePermission, PermissionLevel, Share, ShareDecision, ShareStatus,
};
use proptest::prelude::*;
use uuid::Uuid;

fn arb_user() -> impl Strategy<Value = UserId> {
    any::<u128>().prop_map(|n| UserId::from_uuid(Uuid::from_u128(n)))
}

fn arb_level() -> impl Strategy<Value = PermissionLevel> {
    prop_oneof![
        Just(PermissionLevel::View),
        Just(PermissionLevel::Edit),
        Just(PermissionLevel::Admin),
    ]
}

fn arb_status() -> impl Strategy<Value = ShareStatus> {
    prop_oneof![
        Just(ShareStatus::Pending),
        Just(ShareStatus::Accepted),
        Just(ShareStatus::Rejected),
    ]
}

fn arb_decision() -> impl Strategy<Value = ShareDecision> {
    prop_oneof![Just(ShareDecision::Accepted), Just(ShareDecision::Rejected)]
}

fn make_share(
    owner: UserId,
    grantee: UserId,
    level: PermissionLevel,
    status: ShareStatus,
) -> Share {
    let mut share = Share::pending(TaskId::new(), owner, grantee, level);
    share.status = status;
    share
}

proptest! {
    #[test]
    fn owner_iff_creator(
        owner in arb_user(),
        actor in arb_user(),
        level in arb_level(),
        status in arb_status(),
    ) {
        let share = make_share(owner, actor, level, status);
        let perm = EffectivePermission::derive(owner, actor, Some(&share));
        prop_assert_eq!(perm == EffectivePermission::Owner, actor == owner);
    }

    #[test]
    fn non_owner_gets_accepted_level_only(
        owner in arb_user(),
        grantee in arb_user(),
        level in arb_level(),
        status in arb_status(),
    ) {
        prop_assume!(owner != grantee);
        let share = make_share(owner, grantee, level, status);
        let perm = EffectivePermission::derive(owner, grantee, Some(&share));
        let expected = if status == ShareStatus::Accepted {
            EffectivePermission::from(level)
        } else {
            EffectivePermission::None
        };
        prop_assert_eq!(perm, expected);
    }

    #[test]
    fn chat_gate_is_stricter_than_mutation(
        owner in arb_user(),
        grantee in arb_user(),
        level in arb_level(),
        status in arb_status(),
    ) {
        let share = make_share(owner, grantee, level, status);
        let perm = EffectivePermission::derive(owner, grantee, Some(&share));
        if perm.can_chat() {
            prop_assert!(perm.can_mutate());
        }
        if perm == EffectivePermission::Edit {
            prop_assert!(perm.can_mutate());
            prop_assert!(!perm.can_chat());
        }
        prop_assert_eq!(
            perm.can_chat(),
            perm == EffectivePermission::Owner || perm == EffectivePermission::Admin
        );
    }

    #[test]
    fn decisions_apply_at_most_once(decisions in prop::collection::vec(arb_decision(), 1..8)) {
        let mut status = ShareStatus::Pending;
        let mut transitions = 0;
        for decision in &decisions {
            if let Some(next) = status.respond(*decision) {
                prop_assert_eq!(status, ShareStatus::Pending);
                status = next;
                transitions += 1;
            }
        }
        prop_assert_eq!(transitions, 1);
        prop_assert_eq!(status, decisions[0].target());
    }
}
