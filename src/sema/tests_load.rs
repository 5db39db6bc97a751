use crate::error::Error;
use crate::exec::datetime::{parse_zone_offset, DatePart};
use crate::parse;
use crate::sema::spec::{
    address_part_tag_specs, bind, extract_address_part, extract_matcher, matcher_tag_specs,
    PosSpec, TagSpec,
};
use crate::sema::{Script, TestNode};

pub(crate) fn load_test(script: &Script, t: &parse::Test) -> Result<TestNode, Error> {
    match t.name.as_str() {
        "allof" | "anyof" | "not" => return load_logical(script, t),
        _ => {}
    }
    if !t.tests.is_empty() {
        return Err(Error::load(
            &t.position,
            format!("{} takes no test arguments", t.name),
        ));
    }
    match t.name.as_str() {
        "address" => load_address(script, t),
        "envelope" => load_envelope(script, t),
        "header" => load_header(script, t),
        "exists" => load_exists(script, t),
        "size" => load_size(script, t),
        "true" => load_const(script, t, TestNode::True),
        "false" => load_const(script, t, TestNode::False),
        "string" => load_string(script, t),
        "date" => load_date(script, t),
        "currentdate" => load_currentdate(script, t),
        "mailboxexists" => load_mailboxexists(script, t),
        "test_script_compile" => load_script_compile(script, t),
        "test_script_run" => load_script_run(script, t),
        _ => Err(Error::load(
            &t.position,
            format!("unknown test \"{}\"", t.name),
        )),
    }
}

fn require(script: &Script, name: &str, t: &parse::Test) -> Result<(), Error> {
    if script.requires_extension(name) {
        Ok(())
    } else {
        Err(Error::ExtensionMissing(t.position.clone(), name.to_string()))
    }
}

fn load_logical(script: &Script, t: &parse::Test) -> Result<TestNode, Error> {
    if !t.args.is_empty() {
        return Err(Error::load(
            &t.position,
            format!("{} only takes other tests as arguments", t.name),
        ));
    }
    let inner: Result<Vec<_>, _> = t.tests.iter().map(|s| load_test(script, s)).collect();
    let inner = inner?;
    match t.name.as_str() {
        "allof" => Ok(TestNode::AllOf(inner)),
        "anyof" => Ok(TestNode::AnyOf(inner)),
        "not" => {
            let mut inner = inner;
            if inner.len() != 1 {
                return Err(Error::load(&t.position, "not takes exactly one test"));
            }
            Ok(TestNode::Not(Box::new(inner.remove(0))))
        }
        _ => unreachable!(),
    }
}

fn load_address(script: &Script, t: &parse::Test) -> Result<TestNode, Error> {
    let mut tags = matcher_tag_specs();
    tags.extend(address_part_tag_specs());
    let bound = bind(
        script,
        &tags,
        &[PosSpec::strs(), PosSpec::strs()],
        &t.position,
        &t.args,
    )?;
    let headers = bound.pos_strs(0).unwrap();
    let keys = bound.pos_strs(1).unwrap();
    Ok(TestNode::Address {
        address_part: extract_address_part(script, &bound, &t.position)?,
        matcher: extract_matcher(script, &bound, keys, &t.position)?,
        headers,
    })
}

fn load_envelope(script: &Script, t: &parse::Test) -> Result<TestNode, Error> {
    require(script, "envelope", t)?;
    let mut tags = matcher_tag_specs();
    tags.extend(address_part_tag_specs());
    let bound = bind(
        script,
        &tags,
        &[PosSpec::strs(), PosSpec::strs()],
        &t.position,
        &t.args,
    )?;
    let fields = bound.pos_strs(0).unwrap();
    let keys = bound.pos_strs(1).unwrap();
    Ok(TestNode::Envelope {
        address_part: extract_address_part(script, &bound, &t.position)?,
        matcher: extract_matcher(script, &bound, keys, &t.position)?,
        fields,
    })
}

fn load_header(script: &Script, t: &parse::Test) -> Result<TestNode, Error> {
    let bound = bind(
        script,
        &matcher_tag_specs(),
        &[PosSpec::strs(), PosSpec::strs()],
        &t.position,
        &t.args,
    )?;
    let headers = bound.pos_strs(0).unwrap();
    let keys = bound.pos_strs(1).unwrap();
    Ok(TestNode::Header {
        matcher: extract_matcher(script, &bound, keys, &t.position)?,
        headers,
    })
}

fn load_exists(script: &Script, t: &parse::Test) -> Result<TestNode, Error> {
    let bound = bind(script, &[], &[PosSpec::strs()], &t.position, &t.args)?;
    Ok(TestNode::Exists {
        headers: bound.pos_strs(0).unwrap(),
    })
}

fn load_size(script: &Script, t: &parse::Test) -> Result<TestNode, Error> {
    let bound = bind(
        script,
        &[TagSpec::flag("over"), TagSpec::flag("under")],
        &[PosSpec::num()],
        &t.position,
        &t.args,
    )?;
    let over = bound.flag("over");
    if over == bound.flag("under") {
        return Err(Error::load(
            &t.position,
            "size takes exactly one of :over or :under",
        ));
    }
    Ok(TestNode::Size {
        over,
        limit: bound.pos_num(0).unwrap(),
    })
}

fn load_const(script: &Script, t: &parse::Test, node: TestNode) -> Result<TestNode, Error> {
    bind(script, &[], &[], &t.position, &t.args)?;
    Ok(node)
}

fn load_string(script: &Script, t: &parse::Test) -> Result<TestNode, Error> {
    require(script, "variables", t)?;
    let bound = bind(
        script,
        &matcher_tag_specs(),
        &[PosSpec::strs(), PosSpec::strs()],
        &t.position,
        &t.args,
    )?;
    let source = bound.pos_strs(0).unwrap();
    let keys = bound.pos_strs(1).unwrap();
    Ok(TestNode::StringTest {
        matcher: extract_matcher(script, &bound, keys, &t.position)?,
        source,
    })
}

// date [":zone" <time-zone>] / ":originalzone"] [":index" <n> [":last"]]
//      [COMPARATOR] [MATCH-TYPE] <header> <date-part> <key-list>
fn load_date(script: &Script, t: &parse::Test) -> Result<TestNode, Error> {
    require(script, "date", t)?;
    let mut tags = matcher_tag_specs();
    tags.extend([
        TagSpec::str1("zone"),
        TagSpec::flag("originalzone"),
        TagSpec::num("index"),
        TagSpec::flag("last"),
    ]);
    let bound = bind(
        script,
        &tags,
        &[PosSpec::str1(), PosSpec::str1(), PosSpec::strs()],
        &t.position,
        &t.args,
    )?;

    let zone = bound.str1("zone");
    let original_zone = bound.flag("originalzone");
    if zone.is_some() && original_zone {
        return Err(Error::load(
            &t.position,
            "date: cannot specify both :zone and :originalzone",
        ));
    }
    if let Some(zone) = &zone {
        parse_zone_offset(zone)
            .ok_or_else(|| Error::load(&t.position, format!("invalid zone \"{zone}\"")))?;
    }
    let index = bound.num("index").unwrap_or(0);
    let last = bound.flag("last");
    if last && index == 0 {
        return Err(Error::load(&t.position, "date: :last requires :index"));
    }
    if index > 0 {
        require(script, "index", t)?;
    }

    let part_name = bound.pos_str1(1).unwrap().to_ascii_lowercase();
    let part = DatePart::from_name(&part_name)
        .ok_or_else(|| Error::load(&t.position, format!("invalid date-part \"{part_name}\"")))?;
    let keys = bound.pos_strs(2).unwrap();
    Ok(TestNode::Date {
        matcher: extract_matcher(script, &bound, keys, &t.position)?,
        header: bound.pos_str1(0).unwrap(),
        part,
        zone,
        original_zone,
        index,
        last,
    })
}

fn load_currentdate(script: &Script, t: &parse::Test) -> Result<TestNode, Error> {
    require(script, "date", t)?;
    let mut tags = matcher_tag_specs();
    tags.push(TagSpec::str1("zone"));
    let bound = bind(
        script,
        &tags,
        &[PosSpec::str1(), PosSpec::strs()],
        &t.position,
        &t.args,
    )?;
    let zone = bound.str1("zone");
    if let Some(zone) = &zone {
        parse_zone_offset(zone)
            .ok_or_else(|| Error::load(&t.position, format!("invalid zone \"{zone}\"")))?;
    }
    let part_name = bound.pos_str1(0).unwrap().to_ascii_lowercase();
    let part = DatePart::from_name(&part_name)
        .ok_or_else(|| Error::load(&t.position, format!("invalid date-part \"{part_name}\"")))?;
    let keys = bound.pos_strs(1).unwrap();
    Ok(TestNode::CurrentDate {
        matcher: extract_matcher(script, &bound, keys, &t.position)?,
        part,
        zone,
    })
}

fn load_mailboxexists(script: &Script, t: &parse::Test) -> Result<TestNode, Error> {
    require(script, "mailbox", t)?;
    let bound = bind(script, &[], &[PosSpec::strs()], &t.position, &t.args)?;
    Ok(TestNode::MailboxExists {
        mailboxes: bound.pos_strs(0).unwrap(),
    })
}

fn load_script_compile(script: &Script, t: &parse::Test) -> Result<TestNode, Error> {
    require(script, "vnd.dovecot.testsuite", t)?;
    let bound = bind(script, &[], &[PosSpec::str1()], &t.position, &t.args)?;
    Ok(TestNode::ScriptCompile {
        path: bound.pos_str1(0).unwrap(),
    })
}

fn load_script_run(script: &Script, t: &parse::Test) -> Result<TestNode, Error> {
    require(script, "vnd.dovecot.testsuite", t)?;
    bind(script, &[], &[], &t.position, &t.args)?;
    Ok(TestNode::ScriptRun)
}
