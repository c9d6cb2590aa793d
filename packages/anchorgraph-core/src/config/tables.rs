//! Sensitive-function tables per vulnerability category, plus the PHP
//! builtin list used to cut interprocedural classification short.

use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

use crate::errors::{AnchorError, Result};

/// Vulnerability categories, each selecting one fixed table of sensitive
/// function or construct names. Ids follow the CVE dataset encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum VulnCategory {
    FileDelete,
    FileRead,
    DynamicCode,
    CommandExec,
    FileCopyMove,
    FileInclude,
    Deserialization,
    DbQuery,
    Output,
    FileWrite,
    HttpHeader,
}

impl VulnCategory {
    /// Decode the dataset's numeric vulnerability-type id.
    pub fn from_id(id: u32) -> Result<Self> {
        Ok(match id {
            1 => VulnCategory::FileDelete,
            2 => VulnCategory::FileRead,
            3 => VulnCategory::DynamicCode,
            4 => VulnCategory::CommandExec,
            6 => VulnCategory::FileCopyMove,
            7 => VulnCategory::FileInclude,
            8 => VulnCategory::Deserialization,
            9 => VulnCategory::DbQuery,
            10 => VulnCategory::Output,
            12 => VulnCategory::FileWrite,
            13 => VulnCategory::HttpHeader,
            other => {
                return Err(AnchorError::config(format!(
                    "vulnerability type id {other} not in the function model"
                )))
            }
        })
    }

    /// Sensitive function/construct names for this category.
    pub fn functions(self) -> &'static [&'static str] {
        match self {
            VulnCategory::FileDelete => &["unlink", "rmdir"],
            VulnCategory::FileRead => &["file", "file_get_contents", "readfile", "fopen"],
            VulnCategory::DynamicCode => {
                &["eval", "create_function", "assert", "array_map", "preg_replace"]
            }
            VulnCategory::CommandExec => &[
                "exec",
                "passthru",
                "proc_open",
                "system",
                "shell_exec",
                "popen",
                "pcntl_exec",
            ],
            VulnCategory::FileCopyMove => &["copy", "fopen", "move_uploaded_file", "rename"],
            VulnCategory::FileInclude => {
                &["include", "require", "include_once", "require_once"]
            }
            VulnCategory::Deserialization => &["unserialize"],
            VulnCategory::DbQuery => &[
                "pg_query",
                "pg_send_query",
                "pg_prepare",
                "mysql_query",
                "mysqli_prepare",
                "mysqli_query",
                "mysqli_real_query",
            ],
            VulnCategory::Output => &["echo", "print", "print_r", "die"],
            VulnCategory::FileWrite => &["file_put_contents", "fopen", "fwrite"],
            VulnCategory::HttpHeader => &["header"],
        }
    }

    /// Is `name` in this category's table?
    pub fn contains(self, name: &str) -> bool {
        self.functions().contains(&name)
    }

    /// Allowlisted database wrapper method names, matched only under the
    /// DB-query category.
    pub fn db_wrapper_methods() -> &'static [&'static str] {
        &["SelectLimit", "Execute"]
    }
}

/// Superglobal array names treated as unconditional taint sources.
pub const SUPERGLOBALS: &[&str] = &["_POST", "_GET", "_FILE", "_SESSION", "_COOKIE"];

/// PHP builtin functions. A builtin absent from the active category table is
/// never sensitive and never resolved interprocedurally.
pub static PHP_BUILT_IN_FUNCTIONS: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "abs", "addslashes", "array", "array_diff", "array_filter", "array_flip",
        "array_key_exists", "array_keys", "array_map", "array_merge", "array_pop",
        "array_push", "array_search", "array_shift", "array_slice", "array_unique",
        "array_values", "base64_decode", "base64_encode", "basename", "call_user_func",
        "ceil", "chmod", "chr", "copy", "count", "crc32", "ctype_digit", "date", "define",
        "defined", "dirname", "echo", "empty", "end", "eval", "exec", "explode", "extract",
        "fclose", "feof", "fgets", "file", "file_exists", "file_get_contents",
        "file_put_contents", "filemtime", "filesize", "floatval", "floor", "fopen",
        "fread", "fseek", "function_exists", "fwrite", "getenv", "gettype", "glob",
        "header", "htmlentities", "htmlspecialchars", "implode", "in_array", "include",
        "intdiv", "intval", "is_array", "is_bool", "is_callable", "is_dir", "is_file",
        "is_int", "is_null", "is_numeric", "is_object", "is_readable", "is_string",
        "is_writable", "isset", "join", "json_decode", "json_encode", "krsort", "ksort",
        "ltrim", "max", "md5", "microtime", "min", "mkdir", "mktime", "move_uploaded_file",
        "mysql_query", "mysqli_query", "number_format", "ord", "parse_str", "parse_url",
        "pathinfo", "preg_match", "preg_match_all", "preg_quote", "preg_replace",
        "preg_split", "print", "print_r", "printf", "range", "rawurlencode", "readfile",
        "realpath", "rename", "rmdir", "round", "rtrim", "serialize", "session_start",
        "setcookie", "sha1", "shell_exec", "sort", "sprintf", "sqrt", "str_pad",
        "str_repeat", "str_replace", "str_split", "strcasecmp", "strcmp", "strip_tags",
        "stripos", "stripslashes", "strlen", "strpos", "strrev", "strrpos", "strstr",
        "strtolower", "strtotime", "strtoupper", "strtr", "substr", "system", "time",
        "trim", "ucfirst", "ucwords", "uniqid", "unlink", "unserialize", "unset",
        "urldecode", "urlencode", "usleep", "usort", "var_dump", "var_export", "vsprintf",
    ]
    .into_iter()
    .collect()
});
