use anyhow::{Context, Result, anyhow, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use parley_api::{ApiClient, Attachment, Draft};
use parley_chat::{Directory, Timeline};
use parley_types::models::{ConversationTarget, Group, UserId};

use crate::chat;
use crate::cli::{Command, GroupCommand, TargetArgs};
use crate::render;

pub async fn run(command: Command, api: &ApiClient, ws_url: &str) -> Result<()> {
    match command {
        Command::Register {
            username,
            email,
            password,
        } => {
            let password = password_or_prompt(password).await?;
            let user = api.register(&username, &email, &password).await?;
            println!("Registered {}. Log in with `parley login --email {}`.", user.username, email.trim());
        }
        Command::Login { email, password } => {
            let password = password_or_prompt(password).await?;
            let login = api.login(&email, &password).await?;
            // fills in the user id when the token does not carry it
            if let Err(e) = api.current_user().await {
                debug!("Could not fetch current user: {}", e);
            }
            println!("Logged in as {}.", login.username);
        }
        Command::Logout => {
            api.logout();
            println!("Logged out.");
        }
        Command::Whoami => {
            let me = api.current_user().await?;
            match me.id {
                Some(id) => println!("{} (id {})", me.username, id),
                None => println!("{}", me.username),
            }
            if let Some(picture) = me.profile_picture {
                println!("profile picture: {}", picture);
            }
        }
        Command::Contacts { search } => {
            let directory = Directory::load(api).await?;
            let listing = directory.search(search.as_deref().unwrap_or(""));
            for line in render::listing_lines(&listing) {
                println!("{}", line);
            }
        }
        Command::Groups { name } => {
            let groups = api.groups(name.as_deref()).await?;
            if groups.is_empty() {
                println!("No groups found.");
            }
            for group in &groups {
                println!("{}", render::group_line(group));
            }
        }
        Command::History { target } => {
            let target = resolve(api, &target).await?;
            let mut timeline = Timeline::new();
            timeline.extend(api.history(target.key()).await?);
            if timeline.is_empty() {
                println!("No messages with {} yet.", target.display_name());
            }
            for line in render::timeline_lines(&timeline, api.session().user_id()) {
                println!("{}", line);
            }
        }
        Command::Send { target, text, file } => {
            let target = resolve(api, &target).await?;
            let file = match file {
                Some(path) => Some(Attachment::from_path(&path).await?),
                None => None,
            };
            let message = api.send_message(target.key(), &Draft { text, file }).await?;
            println!("Sent #{} to {}.", message.id, target.display_name());
        }
        Command::Delete { id } => {
            api.delete_message(id).await?;
            println!("Deleted #{}.", id);
        }
        Command::Chat { target } => {
            let target = resolve(api, &target).await?;
            chat::run(api, ws_url, target).await?;
        }
        Command::Group(command) => group(api, command).await?,
        Command::ProfilePicture { path } => {
            let picture = Attachment::from_path(&path).await?;
            match api.update_profile_picture(&picture).await? {
                Some(url) => println!("Profile picture updated: {}", url),
                None => println!("Profile picture updated."),
            }
        }
    }
    Ok(())
}

async fn group(api: &ApiClient, command: GroupCommand) -> Result<()> {
    match command {
        GroupCommand::Create { name, members } => {
            let directory = Directory::load(api).await?;
            let ids = members
                .iter()
                .map(|username| user_id(&directory, username))
                .collect::<Result<Vec<UserId>>>()?;
            let group = api.create_group(&name, &ids).await?;
            println!("Created group {} (id {}).", group.name, group.id);
        }
        GroupCommand::AddUser { group, username } => {
            api.add_member(&group, &username).await?;
            println!("Added {} to {}.", username.trim(), group.trim());
        }
        GroupCommand::RemoveUser { group, username } => {
            let found = find_group(api, &group).await?;
            let directory = Directory::load(api).await?;
            let uid = user_id(&directory, &username)?;
            api.remove_member(found.id, uid).await?;
            println!("Removed {} from {}.", username.trim(), found.name);
        }
        GroupCommand::Delete { name } => {
            api.delete_group(&name).await?;
            println!("Deleted group {}.", name.trim());
        }
        GroupCommand::Icon { group, path } => {
            let found = find_group(api, &group).await?;
            let icon = Attachment::from_path(&path).await?;
            api.update_group_icon(found.id, &icon).await?;
            println!("Updated icon of {}.", found.name);
        }
    }
    Ok(())
}

/// Turn `--user`/`--group` into a conversation target.
async fn resolve(api: &ApiClient, args: &TargetArgs) -> Result<ConversationTarget> {
    match (&args.user, &args.group) {
        (Some(username), _) => {
            let directory = Directory::load(api).await?;
            let contact = directory
                .find_contact(username)
                .ok_or_else(|| anyhow!("no user named {}", username.trim()))?;
            Ok(contact.target())
        }
        (None, Some(name)) => Ok(find_group(api, name).await?.target()),
        (None, None) => bail!("pass --user or --group"),
    }
}

async fn find_group(api: &ApiClient, name: &str) -> Result<Group> {
    api.find_group(name)
        .await?
        .ok_or_else(|| anyhow!("no group named {}", name.trim()))
}

fn user_id(directory: &Directory, username: &str) -> Result<UserId> {
    directory
        .find_contact(username)
        .map(|c| c.id)
        .ok_or_else(|| anyhow!("no user named {}", username.trim()))
}

async fn password_or_prompt(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    eprint!("Password: ");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("reading password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
