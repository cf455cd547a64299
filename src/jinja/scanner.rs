use super::{
    Block, BodyGrammar, FUNCTION_CLOSE, FUNCTION_OPEN, PARAMETER_CLOSE, PARAMETER_OPEN,
    THINK_CLOSE, THINK_OPEN,
};

/// Finds tags with plain substring search.
#[derive(Clone, Copy, Debug, Default)]
pub struct Scanner;

impl BodyGrammar for Scanner {
    fn split_reasoning<'a>(&self, content: &'a str) -> (Option<&'a str>, String) {
        let open = content.find(THINK_OPEN);
        if let Some(close) = content.find(THINK_CLOSE) {
            if open.map_or(true, |o| o > close) {
                let rest = &content[close + THINK_CLOSE.len()..];
                return (Some(&content[..close]), rest.to_string());
            }
        }
        let Some(open) = open else {
            return (None, content.to_string());
        };
        let inner_start = open + THINK_OPEN.len();
        match content[inner_start..].find(THINK_CLOSE) {
            Some(rel) => {
                let close = inner_start + rel;
                let mut rest = content[..open].to_string();
                rest.push_str(&content[close + THINK_CLOSE.len()..]);
                (Some(&content[inner_start..close]), rest)
            }
            None => (Some(&content[inner_start..]), content[..open].to_string()),
        }
    }

    fn split_blocks<'a>(&self, content: &'a str, block: Block) -> (Vec<&'a str>, String) {
        let mut blocks = Vec::new();
        let mut outside = String::new();
        let mut cursor = 0;
        while let Some(start_rel) = content[cursor..].find(block.open()) {
            outside.push_str(&content[cursor..cursor + start_rel]);
            let start = cursor + start_rel + block.open().len();
            if let Some(end_rel) = content[start..].find(block.close()) {
                let end = start + end_rel;
                blocks.push(&content[start..end]);
                cursor = end + block.close().len();
            } else {
                blocks.push(&content[start..]);
                cursor = content.len();
                break;
            }
        }
        outside.push_str(&content[cursor..]);
        (blocks, outside)
    }

    fn functions<'a>(&self, block: &'a str) -> Vec<(&'a str, &'a str)> {
        let mut functions = Vec::new();
        let mut pos = 0;
        while let Some(func_rel) = block[pos..].find(FUNCTION_OPEN) {
            let name_start = pos + func_rel + FUNCTION_OPEN.len();
            let rest = &block[name_start..];
            let Some(name_end_rel) = rest.find('>') else {
                break;
            };
            let func_name = &rest[..name_end_rel];
            let body_start = name_start + name_end_rel + 1;
            match block[body_start..].find(FUNCTION_CLOSE) {
                Some(end_rel) => {
                    functions.push((func_name, &block[body_start..body_start + end_rel]));
                    pos = body_start + end_rel + FUNCTION_CLOSE.len();
                }
                None => {
                    functions.push((func_name, &block[body_start..]));
                    break;
                }
            }
        }
        functions
    }

    fn parameters<'a>(&self, body: &'a str) -> Vec<(&'a str, &'a str)> {
        let mut params = Vec::new();
        let mut ppos = 0;
        while let Some(p_rel) = body[ppos..].find(PARAMETER_OPEN) {
            let p_name_start = ppos + p_rel + PARAMETER_OPEN.len();
            let p_rest = &body[p_name_start..];
            let Some(p_name_end_rel) = p_rest.find('>') else {
                break;
            };
            let p_name = &p_rest[..p_name_end_rel];
            let p_val_start = p_name_start + p_name_end_rel + 1;
            let p_val_rest = &body[p_val_start..];

            let end_parameter = p_val_rest.find(PARAMETER_CLOSE);
            let next_parameter = p_val_rest.find(PARAMETER_OPEN);
            let (value_end, consumed) = match (end_parameter, next_parameter) {
                (Some(a), Some(b)) if b < a => (b, b),
                (Some(a), _) => (a, a + PARAMETER_CLOSE.len()),
                (None, Some(b)) => (b, b),
                (None, None) => (p_val_rest.len(), p_val_rest.len()),
            };
            params.push((p_name, &p_val_rest[..value_end]));
            ppos = p_val_start + consumed;
        }
        params
    }
}
