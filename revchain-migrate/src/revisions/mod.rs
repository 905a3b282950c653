//! Revision history of the events database
//!
//! New files come from `revchain-migrate revision -m "..."`; register them here.

pub mod r1975ea83b712_create_user_and_event;
pub mod r27a6b0f3c0d1_add_proposal;
pub mod r3a9f2c4d5e60_add_ticket;
pub mod r4b8e1d2c3f7a_merge_proposal_and_ticket;
pub mod r5c0d9e8f7a6b_add_user_uuid;
pub mod r6d1e2f3a4b5c_rename_event_name_to_title;
pub mod r7e2f3a4b5c6d_add_notification_preference;

use revchain::migration::Revision;

/// Every revision, in authoring order
pub fn all() -> Vec<Revision> {
    vec![
        r1975ea83b712_create_user_and_event::revision(),
        r27a6b0f3c0d1_add_proposal::revision(),
        r3a9f2c4d5e60_add_ticket::revision(),
        r4b8e1d2c3f7a_merge_proposal_and_ticket::revision(),
        r5c0d9e8f7a6b_add_user_uuid::revision(),
        r6d1e2f3a4b5c_rename_event_name_to_title::revision(),
        r7e2f3a4b5c6d_add_notification_preference::revision(),
    ]
}
