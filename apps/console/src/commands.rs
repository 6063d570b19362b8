use shared::domain::{ConversationId, GroupId, MessageId, UserId};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    List,
    Users,
    OpenConversation(UserId),
    SelectConversation(ConversationId),
    SelectGroup(GroupId),
    Leave,
    Older,
    Read,
    Typing,
    Delete {
        message_id: MessageId,
        for_everyone: bool,
    },
    CreateGroup {
        name: String,
        members: Vec<UserId>,
    },
    Resync,
    Quit,
    Send(String),
}

pub const HELP: &str = "\
/list                      conversations and groups
/users                     people you can start a chat with
/open <user_id>            open (or create) a direct conversation
/chat <conversation_id>    focus a conversation
/group <group_id>          focus a group
/leave                     drop focus
/older                     load the previous history page
/read                      mark the focused thread read
/typing                    send a typing signal
/delete <message_id> [all] delete a message, for everyone with 'all'
/newgroup <name> <ids..>   create a group with the given members
/resync                    refetch everything
/quit                      log out and exit
anything else              send as a message to the focused thread";

fn parse_id(arg: Option<&str>, what: &str) -> Result<i64, String> {
    let raw = arg.ok_or_else(|| format!("missing {what}"))?;
    raw.parse()
        .map_err(|_| format!("'{raw}' is not a valid {what}"))
}

pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    if line.is_empty() {
        return Err("empty input".into());
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };

    let mut args = rest.split_whitespace();
    let name = args.next().unwrap_or_default();
    let command = match name {
        "help" => Command::Help,
        "list" => Command::List,
        "users" => Command::Users,
        "open" => Command::OpenConversation(UserId(parse_id(args.next(), "user id")?)),
        "chat" => Command::SelectConversation(ConversationId(parse_id(
            args.next(),
            "conversation id",
        )?)),
        "group" => Command::SelectGroup(GroupId(parse_id(args.next(), "group id")?)),
        "leave" => Command::Leave,
        "older" => Command::Older,
        "read" => Command::Read,
        "typing" => Command::Typing,
        "delete" => {
            let message_id = args
                .next()
                .map(MessageId::new)
                .ok_or_else(|| "missing message id".to_string())?;
            let for_everyone = match args.next() {
                None => false,
                Some("all") => true,
                Some(other) => return Err(format!("unexpected '{other}', expected 'all'")),
            };
            Command::Delete {
                message_id,
                for_everyone,
            }
        }
        "newgroup" => {
            let name = args
                .next()
                .ok_or_else(|| "missing group name".to_string())?
                .to_string();
            let members = args
                .by_ref()
                .map(|raw| parse_id(Some(raw), "user id").map(UserId))
                .collect::<Result<Vec<_>, _>>()?;
            if members.is_empty() {
                return Err("a group needs at least one other member".into());
            }
            Command::CreateGroup { name, members }
        }
        "resync" => Command::Resync,
        "quit" | "exit" | "logout" => Command::Quit,
        other => return Err(format!("unknown command '/{other}', try /help")),
    };

    if let Some(extra) = args.next() {
        return Err(format!("unexpected argument '{extra}'"));
    }
    Ok(command)
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
