use std::time::Duration;
use tracing::{error, info, warn};

use crate::export::{build_workbook, process_members, truncate_sheet_name, GroupSheet};
use crate::license::{MemberSink, PushMember};
use crate::onebot::{GroupHost, MemberRecord, MessageEvent, ReplyTarget};
use crate::roster::fetch_group_members;

/// At most this many per-group failure lines appear in a batch report; the
/// rest collapse into a count.
const MAX_FAILURE_DETAILS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 导出群数据 [群号]; carries the raw argument, validated at execution time.
    ExportGroup { arg: String },
    /// 导出所有群数据
    ExportAllGroups,
    /// 获取群成员 <群号> / 获取群员QQ
    PushGroup { group_id: Option<i64> },
    /// 获取所有群成员 / 全量更新群成员
    PushAllGroups,
}

fn first_number(text: &str) -> Option<i64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Recognizes the administrative commands in a message's plaintext. Anything
/// else is not ours and returns `None`.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    if text.starts_with("导出所有群数据") {
        return Some(Command::ExportAllGroups);
    }
    if let Some(rest) = text.strip_prefix("导出群数据") {
        return Some(Command::ExportGroup {
            arg: rest.trim().to_string(),
        });
    }
    if text.starts_with("获取所有群成员") || text.starts_with("全量更新群成员") {
        return Some(Command::PushAllGroups);
    }
    if text.starts_with("获取群成员") || text.starts_with("获取群员QQ") {
        return Some(Command::PushGroup {
            group_id: first_number(text),
        });
    }
    None
}

pub struct CommandContext<'a> {
    pub host: &'a dyn GroupHost,
    pub sink: &'a dyn MemberSink,
    pub admins: &'a [i64],
    pub page_delay: Duration,
    pub group_delay: Duration,
}

impl CommandContext<'_> {
    fn is_admin(&self, user_id: i64) -> bool {
        self.admins.contains(&user_id)
    }

    /// Reply failures are logged and swallowed; a dead reply channel must not
    /// abort the operation behind it.
    async fn say(&self, target: ReplyTarget, text: &str) {
        if let Err(e) = self.host.send_text(target, text).await {
            warn!("reply failed ({:?}): {}", target, e);
        }
    }
}

/// Dispatches one inbound message. Not-a-command messages are ignored;
/// command errors end as plain-text replies, never as propagated errors.
pub async fn handle_message(ctx: &CommandContext<'_>, ev: &MessageEvent) {
    let Some(command) = parse_command(&ev.raw_message) else {
        return;
    };
    info!(
        "command from user={} ({:?}): {:?}",
        ev.user_id,
        ev.reply_target(),
        command
    );
    match command {
        Command::ExportGroup { arg } => export_group(ctx, ev, &arg).await,
        Command::ExportAllGroups => export_all_groups(ctx, ev).await,
        Command::PushGroup { group_id } => push_group(ctx, ev, group_id).await,
        Command::PushAllGroups => push_all_groups(ctx, ev).await,
    }
}

fn to_push_members(members: &[MemberRecord]) -> Vec<PushMember> {
    members
        .iter()
        .map(|m| PushMember {
            group_id: m.group_id,
            user_id: m.user_id,
            nickname: m.nickname.clone(),
            card: m.card.clone(),
        })
        .collect()
}

async fn export_group(ctx: &CommandContext<'_>, ev: &MessageEvent, arg: &str) {
    let target = ev.reply_target();

    let group_id = if !arg.is_empty() {
        if !arg.chars().all(|c| c.is_ascii_digit()) {
            ctx.say(target, "请输入有效的群号").await;
            return;
        }
        match arg.parse::<i64>() {
            Ok(id) => id,
            Err(_) => {
                ctx.say(target, "请输入有效的群号").await;
                return;
            }
        }
    } else {
        match ev.group_id {
            Some(id) => id,
            None => {
                ctx.say(target, "请在群聊中使用此命令或提供有效的群号").await;
                return;
            }
        }
    };

    // 只允许导出自己所在的群。
    if ctx
        .host
        .get_group_member_info(group_id, ev.user_id)
        .await
        .is_err()
    {
        ctx.say(target, "你不在该群聊中，无法导出数据").await;
        return;
    }

    let members = match fetch_group_members(ctx.host, group_id, ctx.page_delay).await {
        Ok(m) => m,
        Err(e) => {
            error!("export fetch failed: group={} err={}", group_id, e);
            ctx.say(target, &format!("导出群数据时出错: {}", e)).await;
            return;
        }
    };

    let rows = process_members(&members);
    let count = rows.len();
    let sheet = GroupSheet {
        sheet_name: format!("Group_{}", group_id),
        group_name: None,
        rows,
    };
    let bytes = match build_workbook(&[sheet]) {
        Ok(b) => b,
        Err(e) => {
            error!("workbook build failed: group={} err={}", group_id, e);
            ctx.say(target, &format!("导出群数据时出错: {}", e)).await;
            return;
        }
    };

    let file_name = format!("群聊{}的{}名成员的数据.xlsx", group_id, count);
    if let Err(e) = ctx.host.upload_file(target, &bytes, &file_name).await {
        error!("file upload failed: {} err={}", file_name, e);
        ctx.say(target, &format!("导出群数据时出错: {}", e)).await;
        return;
    }
    info!("exported group {}: {} members, {}", group_id, count, file_name);
}

async fn export_all_groups(ctx: &CommandContext<'_>, ev: &MessageEvent) {
    let target = ev.reply_target();
    if !ctx.is_admin(ev.user_id) {
        ctx.say(target, "你没有权限执行此操作").await;
        return;
    }

    let groups = match ctx.host.get_group_list().await {
        Ok(g) => g,
        Err(e) => {
            ctx.say(target, &format!("导出所有群数据时出错: {}", e)).await;
            return;
        }
    };
    ctx.say(target, &format!("正在导出{}个群的数据...", groups.len()))
        .await;

    let mut sheets = Vec::new();
    let mut total_members = 0usize;
    for group in &groups {
        let members = match fetch_group_members(ctx.host, group.group_id, ctx.page_delay).await {
            Ok(m) => m,
            Err(e) => {
                // One bad group must not sink the rest of the workbook.
                error!("skipping group {} in export: {}", group.group_id, e);
                continue;
            }
        };
        let rows = process_members(&members);
        total_members += rows.len();
        info!(
            "exported {}({}): {} members",
            group.group_name,
            group.group_id,
            rows.len()
        );
        sheets.push(GroupSheet {
            sheet_name: truncate_sheet_name(&format!("G{}", group.group_id)),
            group_name: Some(group.group_name.clone()),
            rows,
        });
    }

    let bytes = match build_workbook(&sheets) {
        Ok(b) => b,
        Err(e) => {
            ctx.say(target, &format!("导出所有群数据时出错: {}", e)).await;
            return;
        }
    };
    let file_name = format!("{}个群的{}名成员的数据.xlsx", groups.len(), total_members);
    if let Err(e) = ctx.host.upload_file(target, &bytes, &file_name).await {
        ctx.say(target, &format!("导出所有群数据时出错: {}", e)).await;
    }
}

async fn push_group(ctx: &CommandContext<'_>, ev: &MessageEvent, group_id: Option<i64>) {
    let target = ev.reply_target();
    if !ctx.is_admin(ev.user_id) {
        ctx.say(target, "你没有权限执行此操作").await;
        return;
    }

    let Some(group_id) = group_id else {
        ctx.say(target, "请指定群号，格式：获取群成员 123456789").await;
        return;
    };
    ctx.say(target, &format!("开始获取群 {} 的成员信息...", group_id))
        .await;

    let members = match fetch_group_members(ctx.host, group_id, ctx.page_delay).await {
        Ok(m) => m,
        Err(e) => {
            ctx.say(target, &format!("获取失败：{}", e)).await;
            return;
        }
    };

    let bot_qq = match ctx.host.login_id().await {
        Ok(id) => id,
        Err(e) => {
            ctx.say(target, &format!("推送数据失败：{}", e)).await;
            return;
        }
    };

    match ctx.sink.push_members(bot_qq, &to_push_members(&members)).await {
        Ok(()) => {
            ctx.say(
                target,
                &format!("成功记录群 {} 的 {} 名成员", group_id, members.len()),
            )
            .await;
        }
        Err(message) => {
            ctx.say(target, &format!("记录失败：{}", message)).await;
        }
    }
}

/// Batch report with success/failure counts; failure details are capped at
/// `MAX_FAILURE_DETAILS` lines plus a remainder count.
fn build_batch_report(success: usize, failures: &[String]) -> String {
    let mut report = format!(
        "批量处理完成！\n成功：{} 个群\n失败：{} 个群",
        success,
        failures.len()
    );
    if !failures.is_empty() {
        report.push_str("\n失败详情：");
        for line in failures.iter().take(MAX_FAILURE_DETAILS) {
            report.push('\n');
            report.push_str(line);
        }
        let hidden = failures.len().saturating_sub(MAX_FAILURE_DETAILS);
        if hidden > 0 {
            report.push_str(&format!("\n……另有 {} 条失败记录", hidden));
        }
    }
    report
}

async fn push_all_groups(ctx: &CommandContext<'_>, ev: &MessageEvent) {
    let target = ev.reply_target();
    if !ctx.is_admin(ev.user_id) {
        ctx.say(target, "你没有权限执行此操作").await;
        return;
    }

    let groups = match ctx.host.get_group_list().await {
        Ok(g) => g,
        Err(e) => {
            ctx.say(target, &format!("执行失败：{}", e)).await;
            return;
        }
    };
    if groups.is_empty() {
        ctx.say(target, "机器人未加入任何群").await;
        return;
    }

    let bot_qq = match ctx.host.login_id().await {
        Ok(id) => id,
        Err(e) => {
            ctx.say(target, &format!("执行失败：{}", e)).await;
            return;
        }
    };

    let total = groups.len();
    ctx.say(
        target,
        &format!("发现 {} 个群，开始批量获取成员信息...", total),
    )
    .await;

    let mut success = 0usize;
    let mut failures: Vec<String> = Vec::new();

    for (i, group) in groups.iter().enumerate() {
        let label = if group.group_name.is_empty() {
            format!("群{}", group.group_id)
        } else {
            group.group_name.clone()
        };
        ctx.say(target, &format!("正在处理 {}（{}/{}）", label, i + 1, total))
            .await;

        match fetch_group_members(ctx.host, group.group_id, ctx.page_delay).await {
            Ok(members) => {
                match ctx.sink.push_members(bot_qq, &to_push_members(&members)).await {
                    Ok(()) => success += 1,
                    Err(message) => failures.push(format!("{}：推送失败 - {}", label, message)),
                }
            }
            Err(e) => {
                failures.push(format!("{}：{}", label, e));
            }
        }

        // 串行限速，避免触发平台风控。
        if i + 1 < total {
            tokio::time::sleep(ctx.group_delay).await;
        }
    }

    ctx.say(target, &build_batch_report(success, &failures)).await;
}
