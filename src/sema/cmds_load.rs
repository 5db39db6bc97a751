use crate::error::Error;
use crate::parse;
use crate::sema::spec::{bind, extract_matcher, matcher_tag_specs, PosSpec, TagSpec};
use crate::sema::{load_block, Cmd, Script, SetModifier};

pub(crate) fn load_command(script: &Script, cmd: &parse::Command) -> Result<Cmd, Error> {
    if !cmd.tests.is_empty() {
        return Err(Error::load(
            &cmd.position,
            format!("{} takes no test arguments", cmd.name),
        ));
    }
    if !cmd.block.is_empty() && cmd.name != "test" {
        return Err(Error::load(
            &cmd.position,
            format!("{} takes no block", cmd.name),
        ));
    }
    match cmd.name.as_str() {
        "stop" => load_plain(script, cmd, Cmd::Stop),
        "keep" => load_keep(script, cmd),
        "discard" => load_plain(script, cmd, Cmd::Discard),
        "fileinto" => load_fileinto(script, cmd),
        "redirect" => load_redirect(script, cmd),
        "addheader" => load_addheader(script, cmd),
        "deleteheader" => load_deleteheader(script, cmd),
        "set" => load_set(script, cmd),
        "setflag" | "addflag" | "removeflag" => load_flag_cmd(script, cmd),
        "vacation" => load_vacation(script, cmd),
        "test" => load_test_case(script, cmd),
        "test_fail" => load_test_fail(script, cmd),
        "test_config_set" => load_test_config_set(script, cmd),
        "test_set" => load_test_set(script, cmd),
        _ => Err(Error::load(
            &cmd.position,
            format!("unknown command \"{}\"", cmd.name),
        )),
    }
}

fn require(script: &Script, name: &str, cmd: &parse::Command) -> Result<(), Error> {
    if script.requires_extension(name) {
        Ok(())
    } else {
        Err(Error::ExtensionMissing(
            cmd.position.clone(),
            name.to_string(),
        ))
    }
}

fn load_plain(script: &Script, cmd: &parse::Command, loaded: Cmd) -> Result<Cmd, Error> {
    bind(script, &[], &[], &cmd.position, &cmd.args)?;
    Ok(loaded)
}

fn load_keep(script: &Script, cmd: &parse::Command) -> Result<Cmd, Error> {
    let bound = bind(
        script,
        &[TagSpec::strs("flags")],
        &[],
        &cmd.position,
        &cmd.args,
    )?;
    let flags = bound.strs("flags");
    if flags.is_some() {
        require(script, "imap4flags", cmd)?;
    }
    Ok(Cmd::Keep { flags })
}

fn load_fileinto(script: &Script, cmd: &parse::Command) -> Result<Cmd, Error> {
    require(script, "fileinto", cmd)?;
    let bound = bind(
        script,
        &[
            TagSpec::flag("copy"),
            TagSpec::flag("create"),
            TagSpec::strs("flags"),
        ],
        &[PosSpec::str1()],
        &cmd.position,
        &cmd.args,
    )?;
    let copy = bound.flag("copy");
    if copy {
        require(script, "copy", cmd)?;
    }
    let create = bound.flag("create");
    if create {
        require(script, "mailbox", cmd)?;
    }
    let flags = bound.strs("flags");
    if flags.is_some() {
        require(script, "imap4flags", cmd)?;
    }
    Ok(Cmd::FileInto {
        mailbox: bound.pos_str1(0).unwrap(),
        copy,
        create,
        flags,
    })
}

fn load_redirect(script: &Script, cmd: &parse::Command) -> Result<Cmd, Error> {
    let bound = bind(
        script,
        &[TagSpec::flag("copy")],
        &[PosSpec::str1()],
        &cmd.position,
        &cmd.args,
    )?;
    let copy = bound.flag("copy");
    if copy {
        require(script, "copy", cmd)?;
    }
    Ok(Cmd::Redirect {
        address: bound.pos_str1(0).unwrap(),
        copy,
    })
}

// "addheader" [":last"] <field-name> <value>
fn load_addheader(script: &Script, cmd: &parse::Command) -> Result<Cmd, Error> {
    require(script, "editheader", cmd)?;
    let bound = bind(
        script,
        &[TagSpec::flag("last")],
        &[PosSpec::str1(), PosSpec::str1()],
        &cmd.position,
        &cmd.args,
    )?;
    Ok(Cmd::AddHeader {
        field: bound.pos_str1(0).unwrap(),
        value: bound.pos_str1(1).unwrap(),
        last: bound.flag("last"),
    })
}

// "deleteheader" [":index" <fieldno> [":last"]] [COMPARATOR] [MATCH-TYPE]
//                <field-name> [<value-patterns>]
fn load_deleteheader(script: &Script, cmd: &parse::Command) -> Result<Cmd, Error> {
    require(script, "editheader", cmd)?;
    let mut tags = matcher_tag_specs();
    tags.extend([TagSpec::num("index"), TagSpec::flag("last")]);
    let bound = bind(
        script,
        &tags,
        &[PosSpec::str1(), PosSpec::strs().optional()],
        &cmd.position,
        &cmd.args,
    )?;
    let index = bound.num("index").unwrap_or(0);
    let last = bound.flag("last");
    if last && index == 0 {
        return Err(Error::load(
            &cmd.position,
            ":last can only be specified with :index",
        ));
    }
    let patterns = bound.pos_strs(1).unwrap_or_default();
    Ok(Cmd::DeleteHeader {
        matcher: extract_matcher(script, &bound, patterns, &cmd.position)?,
        field: bound.pos_str1(0).unwrap(),
        index,
        last,
    })
}

// "set" [MODIFIER...] <name> <value>
fn load_set(script: &Script, cmd: &parse::Command) -> Result<Cmd, Error> {
    require(script, "variables", cmd)?;
    let bound = bind(
        script,
        &[
            TagSpec::flag("lower"),
            TagSpec::flag("upper"),
            TagSpec::flag("lowerfirst"),
            TagSpec::flag("upperfirst"),
            TagSpec::flag("quotewildcard"),
            TagSpec::flag("length"),
        ],
        &[PosSpec::str1(), PosSpec::str1()],
        &cmd.position,
        &cmd.args,
    )?;

    let mut modifiers = Vec::new();
    for (name, m) in [
        ("lower", SetModifier::Lower),
        ("upper", SetModifier::Upper),
        ("lowerfirst", SetModifier::LowerFirst),
        ("upperfirst", SetModifier::UpperFirst),
        ("quotewildcard", SetModifier::QuoteWildcard),
        ("length", SetModifier::Length),
    ] {
        if bound.flag(name) {
            modifiers.push(m);
        }
    }
    // RFC 5229 4.1: modifiers of the same precedence cannot be combined.
    for (i, a) in modifiers.iter().enumerate() {
        if modifiers[i + 1..]
            .iter()
            .any(|b| b.precedence() == a.precedence())
        {
            return Err(Error::load(
                &cmd.position,
                "conflicting set modifiers of the same precedence",
            ));
        }
    }
    // Applied in order of decreasing precedence.
    modifiers.sort_by_key(|m| std::cmp::Reverse(m.precedence()));

    let name = bound.pos_str1(0).unwrap();
    validate_variable_name(script, &name, cmd)?;
    Ok(Cmd::SetVariable {
        name,
        value: bound.pos_str1(1).unwrap(),
        modifiers,
    })
}

fn validate_variable_name(
    script: &Script,
    name: &str,
    cmd: &parse::Command,
) -> Result<(), Error> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !head_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::load(
            &cmd.position,
            format!("invalid variable name \"{name}\""),
        ));
    }
    if name.len() > script.opts.max_variable_name_len {
        return Err(Error::LimitExceeded(format!(
            "variable name \"{name}\" longer than {} characters",
            script.opts.max_variable_name_len
        )));
    }
    Ok(())
}

fn load_flag_cmd(script: &Script, cmd: &parse::Command) -> Result<Cmd, Error> {
    require(script, "imap4flags", cmd)?;
    let bound = bind(script, &[], &[PosSpec::strs()], &cmd.position, &cmd.args)?;
    let flags = bound.pos_strs(0).unwrap();
    Ok(match cmd.name.as_str() {
        "setflag" => Cmd::SetFlag { flags },
        "addflag" => Cmd::AddFlag { flags },
        "removeflag" => Cmd::RemoveFlag { flags },
        _ => unreachable!(),
    })
}

// vacation [":days" number] [":subject" string] [":from" string]
//          [":addresses" string-list] [":mime"] [":handle" string] <reason>
fn load_vacation(script: &Script, cmd: &parse::Command) -> Result<Cmd, Error> {
    require(script, "vacation", cmd)?;
    let bound = bind(
        script,
        &[
            TagSpec::num("days"),
            TagSpec::str1("subject"),
            TagSpec::str1("from"),
            TagSpec::strs("addresses"),
            TagSpec::flag("mime"),
            TagSpec::str1("handle"),
        ],
        &[PosSpec::str1()],
        &cmd.position,
        &cmd.args,
    )?;
    Ok(Cmd::Vacation {
        days: bound.num("days").unwrap_or(7),
        subject: bound.str1("subject").unwrap_or_default(),
        from: bound.str1("from").unwrap_or_default(),
        addresses: bound.strs("addresses").unwrap_or_default(),
        mime: bound.flag("mime"),
        handle: bound.str1("handle").unwrap_or_default(),
        reason: bound.pos_str1(0).unwrap(),
    })
}

fn load_test_case(script: &Script, cmd: &parse::Command) -> Result<Cmd, Error> {
    require(script, "vnd.dovecot.testsuite", cmd)?;
    let bound = bind(script, &[], &[PosSpec::str1()], &cmd.position, &cmd.args)?;
    Ok(Cmd::TestCase {
        name: bound.pos_str1(0).unwrap(),
        body: load_block(script, &cmd.block)?,
    })
}

fn load_test_fail(script: &Script, cmd: &parse::Command) -> Result<Cmd, Error> {
    require(script, "vnd.dovecot.testsuite", cmd)?;
    let bound = bind(script, &[], &[PosSpec::str1()], &cmd.position, &cmd.args)?;
    Ok(Cmd::TestFail {
        at: cmd.position.clone(),
        message: bound.pos_str1(0).unwrap(),
    })
}

fn load_test_config_set(script: &Script, cmd: &parse::Command) -> Result<Cmd, Error> {
    require(script, "vnd.dovecot.testsuite", cmd)?;
    let bound = bind(
        script,
        &[],
        &[PosSpec::str1(), PosSpec::str1().optional()],
        &cmd.position,
        &cmd.args,
    )?;
    Ok(Cmd::TestConfigSet {
        key: bound.pos_str1(0).unwrap(),
        value: bound.pos_str1(1),
    })
}

fn load_test_set(script: &Script, cmd: &parse::Command) -> Result<Cmd, Error> {
    require(script, "vnd.dovecot.testsuite", cmd)?;
    let bound = bind(
        script,
        &[],
        &[PosSpec::str1(), PosSpec::str1()],
        &cmd.position,
        &cmd.args,
    )?;
    Ok(Cmd::TestSet {
        name: bound.pos_str1(0).unwrap(),
        value: bound.pos_str1(1).unwrap(),
    })
}
