//! Directory commands.
//!
//! Handlers return the text to print. Mutating handlers leave saving to
//! the caller, which writes the data file once the command succeeded.

use std::io::{BufRead, Write};

use pym_acl::{EffectivePrincipals, PermissionSnapshot};
use pym_core::{AceId, GroupId, MembershipId, PermissionId, ResourceId, TenantId, UserId};
use pym_storage::{
    AceStore, GroupStore, NewGroup, NewUser, PermissionStore, Principal, User, UserStore,
};
use serde::Deserialize;
use serde_json::Value;

use crate::cli::{Entity, GrantArgs};
use crate::context::App;
use crate::{Error, Result};

// ============================================================================
// Input records
// ============================================================================

/// `create user` data. The password is hashed before it is stored.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UserInput {
    principal: String,
    email: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default = "enabled")]
    is_enabled: bool,
    #[serde(default)]
    descr: Option<String>,
}

fn enabled() -> bool {
    true
}

/// `create group` data.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupInput {
    name: String,
    #[serde(default)]
    tenant_id: Option<i64>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    descr: Option<String>,
}

/// `create permission` data; `parent` is a permission name.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PermissionInput {
    name: String,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    descr: Option<String>,
}

/// `create group-member` data; `group` is an id or name, `member` a
/// `u:`/`g:` reference.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MemberInput {
    group: String,
    member: String,
    #[serde(default)]
    descr: Option<String>,
}

fn parse_input<T: serde::de::DeserializeOwned>(entity: &'static str, data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| Error::invalid(entity, e.to_string()))
}

// ============================================================================
// Reference resolution
// ============================================================================

async fn find_user(app: &App, key: &str) -> Result<User> {
    let found = match key.parse::<UserId>() {
        Ok(id) => app.store().user(id).await?,
        Err(_) => app.store().user_by_principal(key).await?,
    };
    found.ok_or_else(|| pym_storage::Error::not_found("user", key).into())
}

async fn find_group(app: &App, key: &str) -> Result<GroupId> {
    let found = match key.parse::<GroupId>() {
        Ok(id) => app.store().group(id).await?,
        Err(_) => app.store().group_by_name(None, key).await?,
    };
    found
        .map(|g| g.id)
        .ok_or_else(|| pym_storage::Error::not_found("group", key).into())
}

/// Resolve `u:<id or principal>` or `g:<id or name>`.
pub async fn resolve_principal(app: &App, who: &str) -> Result<Principal> {
    match who.split_once(':') {
        Some(("u", key)) => Ok(Principal::User(find_user(app, key.trim()).await?.id)),
        Some(("g", key)) => Ok(Principal::Group(find_group(app, key.trim()).await?)),
        _ => Err(Error::invalid(
            "principal",
            format!("expected 'u:<user>' or 'g:<group>', got '{who}'"),
        )),
    }
}

fn parse_id<T: std::str::FromStr>(what: &'static str, s: &str) -> Result<T> {
    s.parse()
        .map_err(|_| Error::invalid(what, format!("'{s}' is not a number")))
}

// ============================================================================
// init
// ============================================================================

/// Seed builtin permissions, the anonymous account, and the superuser
/// group. Existing records are kept.
pub async fn init(app: &App) -> Result<String> {
    let mut out = Vec::new();
    let seeded = app.permissions().seed_builtin().await?;
    out.push(format!("Seeded {} builtin permissions", seeded.len()));

    let nobody = &app.config().auth.nobody_principal;
    if app.store().user_by_principal(nobody).await?.is_none() {
        let user = app
            .store()
            .create_user(NewUser {
                principal: nobody.clone(),
                email: format!("{nobody}@localhost"),
                display_name: "Anonymous".to_string(),
                is_enabled: false,
                ..Default::default()
            })
            .await?;
        out.push(format!("Created user '{}' ({})", user.principal, user.id));
    }

    let wheel = match app.store().group_by_name(None, "wheel").await? {
        Some(group) => group,
        None => {
            let group = app
                .groups()
                .create_group(NewGroup {
                    name: "wheel".to_string(),
                    descr: Some("Superusers".to_string()),
                    ..Default::default()
                })
                .await?;
            out.push(format!("Created group 'wheel' ({})", group.id));
            group
        }
    };
    if wheel.id.get() != app.config().auth.wheel_group_id {
        out.push(format!(
            "Configured wheel group is {}, run `pym config set auth.wheel_group_id {}`",
            app.config().auth.wheel_group_id,
            wheel.id
        ));
    }
    Ok(out.join("\n"))
}

// ============================================================================
// ls
// ============================================================================

/// All records of an entity as pretty JSON, ordered by id (ACEs in
/// evaluation order).
///
/// Credential hashes, preferences, and profiles are left out of user
/// listings.
pub async fn ls(app: &App, entity: Entity) -> Result<String> {
    let store = app.store();
    let records: Vec<Value> = match entity {
        Entity::User => store
            .list_users()
            .await?
            .iter()
            .map(|u| -> Result<Value> {
                let mut v = to_value(u)?;
                if let Some(map) = v.as_object_mut() {
                    for key in ["pwd", "rc", "profile"] {
                        map.remove(key);
                    }
                }
                Ok(v)
            })
            .collect::<Result<_>>()?,
        Entity::Group => values(store.list_groups().await?)?,
        Entity::GroupMember => values(store.list_members().await?)?,
        Entity::Permission => values(store.list_permissions().await?)?,
        Entity::Ace => {
            let mut aces = store.list_aces().await?;
            pym_acl::sort_aces(&mut aces);
            values(aces)?
        }
    };
    Ok(serde_json::to_string_pretty(&records)?)
}

fn to_value<T: serde::Serialize>(record: &T) -> Result<Value> {
    Ok(serde_json::to_value(record)?)
}

fn values<T: serde::Serialize>(records: Vec<T>) -> Result<Vec<Value>> {
    records.iter().map(to_value).collect()
}

// ============================================================================
// permission-tree, groups
// ============================================================================

/// Indented permission tree, siblings by name.
pub async fn permission_tree(app: &App) -> Result<String> {
    let snapshot = app.permissions().load_all().await?;
    let mut roots: Vec<_> = snapshot.roots().map(|p| (p.name.clone(), p.id)).collect();
    roots.sort();
    let mut lines = Vec::new();
    for (_, id) in roots {
        render_permission(&snapshot, id, 0, &mut lines);
    }
    Ok(lines.join("\n"))
}

fn render_permission(
    snapshot: &PermissionSnapshot,
    id: PermissionId,
    depth: usize,
    lines: &mut Vec<String>,
) {
    let Some(entry) = snapshot.get(id) else {
        return;
    };
    lines.push(format!("{}{} ({})", "  ".repeat(depth), entry.name, entry.id));
    let mut children: Vec<_> = snapshot
        .direct_children(id)
        .map(|c| (c.name.clone(), c.id))
        .collect();
    children.sort();
    for (_, child) in children {
        render_permission(snapshot, child, depth + 1, lines);
    }
}

/// Transitive groups of a user, one `id<TAB>name` per line.
pub async fn groups(app: &App, principal: &str) -> Result<String> {
    let user = find_user(app, principal).await?;
    let mut groups = app.groups().resolver().load_all_groups(&user).await?;
    groups.sort();
    Ok(groups
        .iter()
        .map(|(id, name)| format!("{id}\t{name}"))
        .collect::<Vec<_>>()
        .join("\n"))
}

// ============================================================================
// create, delete
// ============================================================================

/// Create a record from JSON data.
pub async fn create(app: &App, entity: Entity, data: &str) -> Result<String> {
    match entity {
        Entity::User => {
            let input: UserInput = parse_input("user data", data)?;
            let user = app
                .store()
                .create_user(NewUser {
                    principal: input.principal,
                    email: input.email,
                    display_name: input.display_name,
                    first_name: input.first_name,
                    last_name: input.last_name,
                    pwd: input.password.as_deref().map(pym_auth::hash_password),
                    is_enabled: input.is_enabled,
                    descr: input.descr,
                    ..Default::default()
                })
                .await?;
            log::info!("Created user '{}' ({})", user.principal, user.id);
            Ok(format!("Created user '{}' ({})", user.principal, user.id))
        }
        Entity::Group => {
            let input: GroupInput = parse_input("group data", data)?;
            let group = app
                .groups()
                .create_group(NewGroup {
                    tenant_id: input.tenant_id.map(TenantId),
                    name: input.name,
                    kind: input.kind,
                    descr: input.descr,
                })
                .await?;
            Ok(format!("Created group '{}' ({})", group.name, group.id))
        }
        Entity::GroupMember => {
            let input: MemberInput = parse_input("membership data", data)?;
            let group_id = find_group(app, &input.group).await?;
            let member = resolve_principal(app, &input.member).await?;
            let membership = app
                .groups()
                .add_member(group_id, member, input.descr)
                .await?;
            Ok(format!(
                "Added {member} to g:{group_id} (membership {})",
                membership.id
            ))
        }
        Entity::Permission => {
            let input: PermissionInput = parse_input("permission data", data)?;
            let permission = app
                .permissions()
                .create(&input.name, input.parent.as_deref(), input.descr)
                .await?;
            Ok(format!(
                "Created permission '{}' ({})",
                permission.name, permission.id
            ))
        }
        Entity::Ace => Err(Error::invalid(
            "entity",
            "create entries with `pym allow` or `pym deny`",
        )),
    }
}

/// Delete a record by id, or by name/principal where the entity has one.
pub async fn delete(app: &App, entity: Entity, id: &str) -> Result<String> {
    match entity {
        Entity::User => {
            let user = find_user(app, id).await?;
            app.store().delete_user(user.id).await?;
            app.groups()
                .resolver()
                .clear_group_cache(&user.principal)
                .await?;
            log::info!("Deleted user '{}' ({})", user.principal, user.id);
            Ok(format!("Deleted user '{}'", user.principal))
        }
        Entity::Group => {
            let group_id = find_group(app, id).await?;
            app.groups().delete_group(group_id).await?;
            Ok(format!("Deleted group {group_id}"))
        }
        Entity::GroupMember => {
            let membership_id: MembershipId = parse_id("membership id", id)?;
            let m = app.groups().remove_member(membership_id).await?;
            Ok(format!("Removed {} from g:{}", m.member, m.group_id))
        }
        Entity::Permission => {
            let name = match id.parse::<PermissionId>() {
                Ok(pid) => app
                    .permissions()
                    .load_all()
                    .await?
                    .get(pid)
                    .map(|p| p.name.clone())
                    .ok_or_else(|| pym_storage::Error::not_found("permission", pid))?,
                Err(_) => id.to_string(),
            };
            let n = app.permissions().delete(&name).await?;
            Ok(format!("Deleted permission '{name}' ({n} with descendants)"))
        }
        Entity::Ace => {
            let ace_id: AceId = parse_id("ACE id", id)?;
            let ace = app.acl().delete_ace(ace_id).await?;
            Ok(format!(
                "Deleted ACE {} on resource {}",
                ace.id, ace.resource_id
            ))
        }
    }
}

/// Ask on the terminal; `yes` skips the prompt.
pub fn confirm(prompt: &str, yes: bool) -> Result<()> {
    if yes {
        return Ok(());
    }
    print!("{prompt} (y/n)? ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    if answer.trim().eq_ignore_ascii_case("y") {
        Ok(())
    } else {
        Err(Error::Aborted)
    }
}

// ============================================================================
// allow, deny, check
// ============================================================================

/// Add an allow (`allow = true`) or deny entry.
pub async fn grant(app: &App, args: &GrantArgs, allow: bool) -> Result<String> {
    let principal = resolve_principal(app, &args.who).await?;
    let resource_id = ResourceId(args.resource_id);
    let ace = if allow {
        app.acl()
            .allow(resource_id, principal, &args.permission, args.sortix)
            .await?
    } else {
        app.acl()
            .deny(resource_id, principal, &args.permission, args.sortix)
            .await?
    };
    Ok(format!("Created ACE {} (sortix {})", ace.id, ace.sortix))
}

/// Evaluate `permission` on a resource for a user and their groups.
pub async fn check(
    app: &App,
    resource_id: i64,
    permission: &str,
    principal: &str,
) -> Result<String> {
    let user = find_user(app, principal).await?;
    let group_ids = app.groups().resolver().group_ids(&user).await?;
    let principals = EffectivePrincipals::new(user.id, group_ids);
    let decision = app
        .acl()
        .check(ResourceId(resource_id), permission, &principals)
        .await?;
    Ok(format!(
        "{} '{permission}' on {resource_id}: {decision}",
        user.principal
    ))
}
