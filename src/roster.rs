use std::time::Duration;
use tracing::debug;

use crate::onebot::{GroupHost, HostError, MemberRecord};

/// Retrieves the complete member list of one group, following pagination
/// tokens until the platform stops handing them out. Pages are fetched
/// strictly in sequence with `page_delay` between them to respect the
/// platform's rate limits; a failure on any page fails the whole fetch
/// rather than returning a silently truncated roster.
pub async fn fetch_group_members(
    host: &dyn GroupHost,
    group_id: i64,
    page_delay: Duration,
) -> Result<Vec<MemberRecord>, HostError> {
    let mut all = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let page = host
            .get_group_member_page(group_id, next_token.as_deref())
            .await?;
        debug!(
            "member page: group={} items={} more={}",
            group_id,
            page.items.len(),
            page.next_token.is_some()
        );
        for mut member in page.items {
            member.group_id = group_id;
            all.push(member);
        }
        match page.next_token {
            Some(token) => {
                next_token = Some(token);
                tokio::time::sleep(page_delay).await;
            }
            None => break,
        }
    }

    Ok(all)
}
