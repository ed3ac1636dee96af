//! Built-in policy tables.

/// Builtins that may not be called or referenced by submitted code
pub(super) const DENIED_FUNCTIONS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "open",
    "file",
    "input",
    "raw_input",
    "exit",
    "quit",
    "reload",
    "help",
    "vars",
    "locals",
    "globals",
    "dir",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
    "callable",
    "isinstance",
    "issubclass",
    "breakpoint",
    "memoryview",
    "bytearray",
    "classmethod",
    "staticmethod",
    "property",
    "super",
    "type",
    "id",
    "hash",
];

/// Modules whose top-level name is never importable
pub(super) const DENIED_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "socket",
    "urllib",
    "urllib2",
    "urllib3",
    "requests",
    "http",
    "httplib",
    "ftplib",
    "smtplib",
    "email",
    "imaplib",
    "poplib",
    "pickle",
    "marshal",
    "shelve",
    "dbm",
    "gdbm",
    "sqlite3",
    "mysql",
    "psycopg2",
    "pymongo",
    "ctypes",
    "cffi",
    "gc",
    "threading",
    "thread",
    "multiprocessing",
    "asyncio",
    "concurrent",
    "importlib",
    "imp",
    "pkgutil",
    "modulefinder",
    "code",
    "codeop",
    "ast",
    "compiler",
    "py_compile",
    "compileall",
    "dis",
    "pickletools",
    "tempfile",
    "shutil",
    "glob",
    "fnmatch",
    "linecache",
    "fileinput",
    "filecmp",
    "tarfile",
    "zipfile",
    "gzip",
    "bz2",
    "lzma",
    "pty",
    "tty",
    "grp",
    "pwd",
    "spwd",
    "platform",
    "getpass",
    "resource",
    "rlcompleter",
];

/// Modules submitted code may import
pub(super) const ALLOWED_MODULES: &[&str] = &[
    "matplotlib",
    "matplotlib.pyplot",
    "matplotlib.patches",
    "matplotlib.animation",
    "matplotlib.figure",
    "matplotlib.axes",
    "numpy",
    "math",
    "cmath",
    "datetime",
    "time",
    "calendar",
    "re",
    "random",
    "statistics",
    "fractions",
    "decimal",
    "collections",
    "itertools",
    "functools",
    "copy",
    "json",
    "warnings",
];

/// Searched against the raw source, case-insensitive and multi-line
pub(super) const DANGEROUS_PATTERNS: &[&str] = &[
    r"__\w+__",
    r"\.system\s*\(",
    r"\.popen\s*\(",
    r"\.spawn\s*\(",
    r"\.exec[lv]p?e?\s*\(",
    r"\.spawn[lv]p?e?\s*\(",
    r"\.posix_spawn",
    r"\.fork\s*\(",
    r"\.kill\s*\(",
    r"\.unlink\s*\(",
    r"\beval\s*\(",
    r"\bexec\s*\(",
    r"\bimport\s+os\b",
    r"\bfrom\s+os\s+import\b",
    r"\bsubprocess\.",
    r"\.read\s*\(",
    r"\.write\s*\(",
    r"\.delete\s*\(",
    r"\.remove\s*\(",
    r"\.rmdir\s*\(",
    r"\.mkdir\s*\(",
    r"\.chmod\s*\(",
    r"\.chown\s*\(",
    r"https?://",
    r"ftp://",
    r"file://",
    r"\.connect\s*\(",
    r"\.send\s*\(",
    r"\.recv\s*\(",
    r"\.listen\s*\(",
    r"\.bind\s*\(",
];

/// File-open idioms; tolerated only inside the artifact save call
pub(super) const FILE_OPERATION_PATTERNS: &[&str] = &[
    r"\bwith\s+open\s*\(",
    r"\bopen\s*\(",
    r"\bfile\s*\(",
];

/// Network idioms; always rejected
pub(super) const NETWORK_PATTERNS: &[&str] = &[
    r"https?://",
    r"ftp://",
    r"\.connect\s*\(",
    r"\.send\s*\(",
    r"\.recv\s*\(",
    r"\.request\s*\(",
    r"\.urlopen\s*\(",
    r"\.post\s*\(",
    r"\.put\s*\(",
    r"\.patch\s*\(",
    r"\b(requests|httpx|session|client)\.get\s*\(",
    r"\bsocket\.",
    r"\burllib\d?\.",
    r"\brequests\.",
];

/// Builtins exposed to executed code
pub(super) const SAFE_BUILTINS: &[&str] = &[
    "len",
    "str",
    "int",
    "float",
    "list",
    "dict",
    "tuple",
    "set",
    "frozenset",
    "range",
    "enumerate",
    "zip",
    "map",
    "filter",
    "sorted",
    "reversed",
    "max",
    "min",
    "sum",
    "all",
    "any",
    "abs",
    "round",
    "pow",
    "divmod",
    "bool",
    "complex",
    "print",
    "slice",
    "Exception",
    "ValueError",
    "TypeError",
    "KeyError",
    "IndexError",
    "ZeroDivisionError",
    "ArithmeticError",
    "StopIteration",
];

/// Library handles bound before the code runs: (name in namespace, module)
pub(super) const PRELOADED_MODULES: &[(&str, &str)] = &[
    ("matplotlib", "matplotlib"),
    ("plt", "matplotlib.pyplot"),
    ("numpy", "numpy"),
    ("np", "numpy"),
    ("math", "math"),
    ("datetime", "datetime"),
    ("random", "random"),
    ("json", "json"),
    ("re", "re"),
    ("time", "time"),
];
